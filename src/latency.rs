//! Queue-depth control and runtime gain settings.

use std::sync::atomic::{AtomicBool, Ordering};

use atomic_float::AtomicF32;

use crate::queue::SampleQueue;

/// Bounds end-to-end latency by trimming the capture backlog.
///
/// Called once per render callback before the read: when more than
/// `target + callback_size` samples are queued, the oldest `count − target`
/// are dropped so the queue settles back at the target depth.
#[derive(Debug, Clone, Copy)]
pub struct LatencyController {
    target: usize,
}

impl LatencyController {
    pub fn new(target: usize) -> Self {
        Self { target }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Drop excess samples. Returns how many were dropped.
    pub fn trim(&self, queue: &SampleQueue, callback_size: usize) -> usize {
        let available = queue.count();
        if available > self.target + callback_size {
            queue.drop_oldest(available - self.target)
        } else {
            0
        }
    }
}

/// Gains and the enhancement switch, adjustable from any thread.
#[derive(Debug)]
pub struct GainControl {
    input_gain: AtomicF32,
    output_gain: AtomicF32,
    enhance: AtomicBool,
}

impl GainControl {
    pub fn new(input_gain: f32, output_gain: f32) -> Self {
        Self {
            input_gain: AtomicF32::new(input_gain),
            output_gain: AtomicF32::new(output_gain),
            enhance: AtomicBool::new(true),
        }
    }

    pub fn input_gain(&self) -> f32 {
        self.input_gain.load(Ordering::Relaxed)
    }

    pub fn set_input_gain(&self, gain: f32) {
        self.input_gain.store(gain, Ordering::Relaxed);
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain.load(Ordering::Relaxed)
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.output_gain.store(gain, Ordering::Relaxed);
    }

    /// Whether the STFT engine runs. When off, audio is only trimmed and gained.
    pub fn enhance_enabled(&self) -> bool {
        self.enhance.load(Ordering::Relaxed)
    }

    pub fn set_enhance_enabled(&self, enabled: bool) {
        self.enhance.store(enabled, Ordering::Relaxed);
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Scale `buf` in place; unity gain is a no-op.
#[inline]
pub fn apply_gain(buf: &mut [f32], gain: f32) {
    if gain != 1.0 {
        for s in buf.iter_mut() {
            *s *= gain;
        }
    }
}
