/// Slices a continuous sample stream into overlapping analysis frames.
///
/// Incoming samples are appended to a backlog; every time the backlog holds a
/// full frame, the first `frame_size` samples are handed out and the backlog
/// advances by `hop_size`, keeping the overlap for the next frame.
///
/// The backlog is allocated once with room for one frame plus the largest
/// block the caller pushes between drains, so [`push`](Self::push) never
/// reallocates as long as the caller drains all ready frames after each push.
pub struct Framer {
    backlog: Vec<f32>,
    frame_size: usize,
    hop_size: usize,
}

impl Framer {
    pub fn new(frame_size: usize, hop_size: usize, max_block_size: usize) -> Self {
        debug_assert!(hop_size > 0 && hop_size <= frame_size);
        Self {
            backlog: Vec::with_capacity(frame_size + max_block_size),
            frame_size,
            hop_size,
        }
    }

    /// Append new input samples to the backlog.
    pub fn push(&mut self, input: &[f32]) {
        debug_assert!(
            self.backlog.len() + input.len() <= self.backlog.capacity(),
            "framer backlog would reallocate"
        );
        self.backlog.extend_from_slice(input);
    }

    /// Copy the next ready frame into `frame` and advance by one hop.
    ///
    /// Returns `false` (leaving `frame` untouched) while the backlog is
    /// shorter than one frame.
    pub fn next_frame(&mut self, frame: &mut [f32]) -> bool {
        debug_assert_eq!(frame.len(), self.frame_size);
        if self.backlog.len() < self.frame_size {
            return false;
        }
        frame.copy_from_slice(&self.backlog[..self.frame_size]);

        // Discard the consumed hop, keep the overlap
        let remaining = self.backlog.len() - self.hop_size;
        self.backlog.copy_within(self.hop_size.., 0);
        self.backlog.truncate(remaining);
        true
    }

    /// Samples waiting in the backlog.
    pub fn pending(&self) -> usize {
        self.backlog.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn reset(&mut self) {
        self.backlog.clear();
    }
}
