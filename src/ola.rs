//! Overlap-add reconstruction and the synthesized-sample FIFO.

/// Frame-sized overlap-add accumulator.
///
/// Each synthesized frame is summed into the accumulator, the leading hop is
/// emitted as finished output, and the accumulator shifts left by one hop with
/// zeros entering at the tail.
pub struct OlaSynthesizer {
    accum: Vec<f32>,
    hop_size: usize,
}

impl OlaSynthesizer {
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        debug_assert!(hop_size <= frame_size);
        Self {
            accum: vec![0.0; frame_size],
            hop_size,
        }
    }

    /// Add one windowed frame and write the completed hop into `hop_out`.
    pub fn add_frame(&mut self, frame: &[f32], hop_out: &mut [f32]) {
        debug_assert_eq!(frame.len(), self.accum.len());
        debug_assert_eq!(hop_out.len(), self.hop_size);

        for (a, &x) in self.accum.iter_mut().zip(frame) {
            *a += x;
        }
        hop_out.copy_from_slice(&self.accum[..self.hop_size]);

        let len = self.accum.len();
        self.accum.copy_within(self.hop_size.., 0);
        self.accum[len - self.hop_size..].fill(0.0);
    }

    pub fn reset(&mut self) {
        self.accum.fill(0.0);
    }
}

/// Fixed-capacity FIFO of synthesized samples awaiting delivery.
///
/// Single-threaded ring (render side only); never reallocates.
pub struct HopFifo {
    buffer: Vec<f32>,
    read_pos: usize,
    len: usize,
}

impl HopFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            read_pos: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `samples`; returns `false` and appends nothing if they do not fit.
    pub fn push(&mut self, samples: &[f32]) -> bool {
        let cap = self.buffer.len();
        let n = samples.len();
        if self.len + n > cap {
            return false;
        }
        let start = (self.read_pos + self.len) % cap.max(1);
        let first = n.min(cap - start);
        self.buffer[start..start + first].copy_from_slice(&samples[..first]);
        self.buffer[..n - first].copy_from_slice(&samples[first..]);
        self.len += n;
        true
    }

    /// Move up to `out.len()` queued samples into the front of `out`.
    ///
    /// Returns how many were written; the rest of `out` is left untouched.
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let cap = self.buffer.len();
        let n = out.len().min(self.len);
        if n == 0 {
            return 0;
        }
        let first = n.min(cap - self.read_pos);
        out[..first].copy_from_slice(&self.buffer[self.read_pos..self.read_pos + first]);
        out[first..n].copy_from_slice(&self.buffer[..n - first]);
        self.read_pos = (self.read_pos + n) % cap;
        self.len -= n;
        n
    }

    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stft::sqrt_hann_window;

    #[test]
    fn test_ola_shift() {
        let mut ola = OlaSynthesizer::new(4, 2);
        let mut hop = [0.0f32; 2];
        ola.add_frame(&[1.0, 2.0, 3.0, 4.0], &mut hop);
        assert_eq!(hop, [1.0, 2.0]);
        ola.add_frame(&[10.0, 20.0, 30.0, 40.0], &mut hop);
        assert_eq!(hop, [13.0, 24.0]);
        ola.add_frame(&[0.0; 4], &mut hop);
        assert_eq!(hop, [30.0, 40.0]);
        ola.add_frame(&[0.0; 4], &mut hop);
        assert_eq!(hop, [0.0, 0.0]);
    }

    #[test]
    fn test_hann_frames_sum_to_unity() {
        let n = 960;
        let hop_len = n / 2;
        let w = sqrt_hann_window(n);
        let frame: Vec<f32> = w.iter().map(|&x| x * x).collect();
        let mut ola = OlaSynthesizer::new(n, hop_len);
        let mut hop = vec![0.0f32; hop_len];
        ola.add_frame(&frame, &mut hop);
        for _ in 0..4 {
            ola.add_frame(&frame, &mut hop);
            assert!(hop.iter().all(|&v| (v - 1.0).abs() < 1e-5));
        }
    }

    #[test]
    fn test_fifo_wrap() {
        let mut fifo = HopFifo::new(5);
        assert!(fifo.push(&[1.0, 2.0, 3.0]));
        let mut out = [0.0f32; 2];
        assert_eq!(fifo.pop_into(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert!(fifo.push(&[4.0, 5.0, 6.0, 7.0]));
        assert!(!fifo.push(&[8.0]));
        let mut all = [0.0f32; 5];
        assert_eq!(fifo.pop_into(&mut all), 5);
        assert_eq!(all, [3.0, 4.0, 5.0, 6.0, 7.0]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_fifo_shortfall_takes_what_is_queued() {
        let mut fifo = HopFifo::new(4);
        assert!(fifo.push(&[1.0, 2.0, 3.0]));
        let mut skip = [0.0f32; 2];
        assert_eq!(fifo.pop_into(&mut skip), 2);
        // Queued run now wraps the end of the buffer
        assert!(fifo.push(&[4.0, 5.0]));
        let mut out = [9.0f32; 5];
        assert_eq!(fifo.pop_into(&mut out), 3);
        assert_eq!(out, [3.0, 4.0, 5.0, 9.0, 9.0]);
        assert!(fifo.is_empty());
        assert_eq!(fifo.pop_into(&mut out), 0);

        assert!(fifo.push(&[6.0]));
        fifo.reset();
        assert_eq!(fifo.len(), 0);
    }
}
