use parking_lot::Mutex;

use crate::{Error, Result};

/// Cursor state guarded by the queue lock.
struct QueueState {
    buffer: Box<[f32]>,
    read_pos: usize,
    write_pos: usize,
    count: usize,
}

/// Fixed-capacity f32 sample queue between the capture and render threads.
///
/// Single producer, single consumer. Every operation takes one short
/// `parking_lot` lock for its whole duration and does at most an O(n) copy:
/// no allocation after construction, no nested locking.
///
/// Writes and reads are all-or-nothing: [`write`](Self::write) refuses input
/// that does not fit, [`read`](Self::read) refuses to hand out fewer samples
/// than requested.
pub struct SampleQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl SampleQueue {
    /// Create a queue holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::Config("sample queue capacity must be nonzero".to_string()));
        }
        Ok(Self {
            state: Mutex::new(QueueState {
                buffer: vec![0.0f32; capacity].into_boxed_slice(),
                read_pos: 0,
                write_pos: 0,
                count: 0,
            }),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples available to read.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }

    /// Number of samples that can be written.
    pub fn free_space(&self) -> usize {
        self.capacity - self.count()
    }

    /// Append `samples`. Returns `false` and leaves the queue untouched on overflow.
    pub fn write(&self, samples: &[f32]) -> bool {
        let n = samples.len();
        let mut state = self.state.lock();
        if state.count + n > self.capacity {
            return false;
        }
        if n == 0 {
            return true;
        }

        let start = state.write_pos;
        let first = n.min(self.capacity - start);
        state.buffer[start..start + first].copy_from_slice(&samples[..first]);
        if first < n {
            // Wrap-around write
            state.buffer[..n - first].copy_from_slice(&samples[first..]);
        }

        state.write_pos = (start + n) % self.capacity;
        state.count += n;
        true
    }

    /// Fill `out` with the oldest samples. Returns `false` and leaves both the
    /// queue and `out` untouched on underflow.
    pub fn read(&self, out: &mut [f32]) -> bool {
        let n = out.len();
        let mut state = self.state.lock();
        if state.count < n {
            return false;
        }
        if n == 0 {
            return true;
        }

        let start = state.read_pos;
        let first = n.min(self.capacity - start);
        out[..first].copy_from_slice(&state.buffer[start..start + first]);
        if first < n {
            out[first..].copy_from_slice(&state.buffer[..n - first]);
        }

        state.read_pos = (start + n) % self.capacity;
        state.count -= n;
        true
    }

    /// Discard up to `n` of the oldest samples without copying them.
    ///
    /// Returns how many were actually dropped (clamped to the current count).
    pub fn drop_oldest(&self, n: usize) -> usize {
        let mut state = self.state.lock();
        let dropped = n.min(state.count);
        state.read_pos = (state.read_pos + dropped) % self.capacity;
        state.count -= dropped;
        dropped
    }

    /// Reset the queue to empty state. The buffer is kept.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.read_pos = 0;
        state.write_pos = 0;
        state.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read() {
        let q = SampleQueue::new(8).unwrap();
        assert!(q.write(&[1.0, 2.0, 3.0]));
        assert_eq!(q.count(), 3);

        let mut out = [0.0f32; 3];
        assert!(q.read(&mut out));
        assert_eq!(out, [1.0, 2.0, 3.0]);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn test_wrap_around() {
        let q = SampleQueue::new(4).unwrap();
        assert!(q.write(&[1.0, 2.0, 3.0]));

        let mut out = [0.0f32; 2];
        assert!(q.read(&mut out));

        assert!(q.write(&[4.0, 5.0, 6.0])); // wraps around

        let mut out2 = [0.0f32; 4];
        assert!(q.read(&mut out2));
        assert_eq!(out2, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_overflow_is_all_or_nothing() {
        let q = SampleQueue::new(4).unwrap();
        assert!(q.write(&[1.0, 2.0, 3.0]));
        assert!(!q.write(&[4.0, 5.0]));
        assert_eq!(q.count(), 3);

        let mut out = [0.0f32; 3];
        assert!(q.read(&mut out));
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_underflow_leaves_output() {
        let q = SampleQueue::new(8).unwrap();
        assert!(q.write(&[1.0, 2.0]));
        let mut out = [9.0f32; 3];
        assert!(!q.read(&mut out));
        assert_eq!(out, [9.0, 9.0, 9.0]);
        assert_eq!(q.count(), 2);
    }

    #[test]
    fn test_drop_keeps_newest() {
        let q = SampleQueue::new(8).unwrap();
        assert!(q.write(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(q.drop_oldest(3), 3);
        assert_eq!(q.count(), 2);

        let mut out = [0.0f32; 2];
        assert!(q.read(&mut out));
        assert_eq!(out, [4.0, 5.0]);

        assert!(q.write(&[6.0]));
        assert_eq!(q.drop_oldest(10), 1);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn test_drop_across_wrap() {
        let q = SampleQueue::new(4).unwrap();
        assert!(q.write(&[1.0, 2.0, 3.0]));
        q.drop_oldest(3);
        assert!(q.write(&[4.0, 5.0, 6.0, 7.0]));
        assert_eq!(q.drop_oldest(2), 2);
        let mut out = [0.0f32; 2];
        assert!(q.read(&mut out));
        assert_eq!(out, [6.0, 7.0]);
    }

    #[test]
    fn test_reset() {
        let q = SampleQueue::new(4).unwrap();
        assert!(q.write(&[1.0, 2.0, 3.0]));
        q.reset();
        assert_eq!(q.count(), 0);
        assert_eq!(q.free_space(), 4);
        assert!(q.write(&[7.0, 8.0, 9.0, 10.0]));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(SampleQueue::new(0).is_err());
    }

    #[test]
    fn test_fifo_over_many_cycles() {
        let q = SampleQueue::new(7).unwrap();
        let mut next_in = 0.0f32;
        let mut next_out = 0.0f32;
        for round in 0..50 {
            let n_write = 1 + round % 5;
            let chunk: Vec<f32> = (0..n_write).map(|i| next_in + i as f32).collect();
            if q.write(&chunk) {
                next_in += n_write as f32;
            }
            let n_read = 1 + (round * 3) % 4;
            let mut out = vec![0.0f32; n_read];
            if q.read(&mut out) {
                for v in out {
                    assert_eq!(v, next_out);
                    next_out += 1.0;
                }
            }
        }
    }
}
