//! Windowed forward/inverse FFT for the streaming STFT.
//!
//! Analysis and synthesis both use a square-root periodic Hann window, so their
//! product is a Hann window and 50%-overlapped frames add back to unity.
//!
//! Spectra are kept as full `frame_size` complex buffers. The first
//! `frame_size / 2 + 1` bins carry the information; the upper half is the
//! conjugate mirror a real-valued inverse transform needs (see
//! [`mirror_conjugate`]).

use std::sync::Arc;

use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

/// Added to magnitudes before raising them to a (negative) power.
pub const COMPRESSION_EPS: f32 = 1e-10;

/// Forward/inverse transform pair with pre-planned FFTs and scratch.
///
/// [`analysis`](Self::analysis) and [`synthesis`](Self::synthesis) perform
/// zero heap allocations.
pub struct SpectralTransform {
    frame_size: usize,
    window: Vec<f32>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
}

impl SpectralTransform {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft_forward = planner.plan_fft_forward(frame_size);
        let fft_inverse = planner.plan_fft_inverse(frame_size);
        let scratch_len = fft_forward
            .get_inplace_scratch_len()
            .max(fft_inverse.get_inplace_scratch_len());

        Self {
            frame_size,
            window: sqrt_hann_window(frame_size),
            fft_forward,
            fft_inverse,
            scratch: vec![Complex32::new(0.0, 0.0); scratch_len],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn bin_count(&self) -> usize {
        self.frame_size / 2 + 1
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    /// Window `frame` and transform it into `spectrum` (`frame_size` bins, unnormalized).
    pub fn analysis(&mut self, frame: &[f32], spectrum: &mut [Complex32]) {
        debug_assert_eq!(frame.len(), self.frame_size);
        debug_assert_eq!(spectrum.len(), self.frame_size);

        for ((s, &x), &w) in spectrum.iter_mut().zip(frame).zip(&self.window) {
            *s = Complex32::new(x * w, 0.0);
        }
        self.fft_forward.process_with_scratch(spectrum, &mut self.scratch);
    }

    /// Inverse transform `spectrum` in place and write the windowed, scaled
    /// time frame into `out`.
    ///
    /// `spectrum` must be conjugate-symmetric. The result is scaled by
    /// `gain / frame_size`.
    pub fn synthesis(&mut self, spectrum: &mut [Complex32], gain: f32, out: &mut [f32]) {
        debug_assert_eq!(spectrum.len(), self.frame_size);
        debug_assert_eq!(out.len(), self.frame_size);

        self.fft_inverse.process_with_scratch(spectrum, &mut self.scratch);

        let scale = gain / self.frame_size as f32;
        for ((o, s), &w) in out.iter_mut().zip(spectrum.iter()).zip(&self.window) {
            *o = s.re * w * scale;
        }
    }
}

/// Square root of the periodic Hann window: `sqrt(0.5 · (1 − cos(2πn/N)))`.
pub fn sqrt_hann_window(size: usize) -> Vec<f32> {
    let pi = std::f64::consts::PI;
    (0..size)
        .map(|i| {
            let hann = 0.5 * (1.0 - (2.0 * pi * i as f64 / size as f64).cos());
            hann.sqrt() as f32
        })
        .collect()
}

/// Amplitude compression: scales `c` by `(|c| + ε)^(p − 1)`.
#[inline]
pub fn compress(c: Complex32, p: f32) -> Complex32 {
    let scale = (c.norm() + COMPRESSION_EPS).powf(p - 1.0);
    c * scale
}

/// Inverse of [`compress`]: scales `c` by `(|c| + ε)^(1/p − 1)`.
#[inline]
pub fn decompress(c: Complex32, p: f32) -> Complex32 {
    let scale = (c.norm() + COMPRESSION_EPS).powf(1.0 / p - 1.0);
    c * scale
}

/// Rebuild the upper half of a real signal's spectrum from its lower half.
///
/// Bins `1..bin_count - 1` are mirrored to `frame_size - k` with negated
/// imaginary part. DC and Nyquist are left as they are.
pub fn mirror_conjugate(spectrum: &mut [Complex32], bin_count: usize) {
    let n = spectrum.len();
    debug_assert_eq!(bin_count, n / 2 + 1);
    for k in 1..bin_count - 1 {
        spectrum[n - k] = spectrum[k].conj();
    }
}
