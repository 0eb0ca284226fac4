//! Online normalizers for the model features.
//!
//! Both keep an exponentially leaky running statistic per channel and only let
//! it adapt while the caller says so (the feature extractor's energy gate), so
//! that silence does not drag the statistics towards zero.

/// Running mean subtraction over a fixed number of channels.
///
/// `mean = α·mean + (1 − α)·x` when updating; the output is always `x − mean`.
pub struct MeanSubNormalizer {
    mean: Vec<f32>,
    alpha: f32,
}

impl MeanSubNormalizer {
    pub fn new(count: usize, alpha: f32) -> Self {
        Self {
            mean: vec![0.0; count],
            alpha,
        }
    }

    /// Normalize `values` in place, adapting the means first when `update` is set.
    pub fn normalize(&mut self, values: &mut [f32], update: bool) {
        debug_assert_eq!(values.len(), self.mean.len());
        let alpha = self.alpha;
        for (x, mean) in values.iter_mut().zip(self.mean.iter_mut()) {
            if update {
                *mean = alpha * *mean + (1.0 - alpha) * *x;
            }
            *x -= *mean;
        }
    }

    pub fn means(&self) -> &[f32] {
        &self.mean
    }

    pub fn reset(&mut self) {
        self.mean.fill(0.0);
    }
}

/// Per-bin magnitude normalization of an interleaved `[re, im, re, im, ..]` spectrum.
///
/// `mag_mean = α·mag_mean + (1 − α)·|c|` when updating; every bin is scaled by
/// `1 / max(mag_mean, min_mean)`. The means start at 1.0 so the first frames
/// pass through nearly unscaled.
pub struct UnitMagNormalizer {
    mag_mean: Vec<f32>,
    alpha: f32,
    min_mean: f32,
}

impl UnitMagNormalizer {
    pub fn new(count: usize, alpha: f32, min_mean: f32) -> Self {
        Self {
            mag_mean: vec![1.0; count],
            alpha,
            min_mean,
        }
    }

    /// Normalize the interleaved pairs in place.
    pub fn normalize(&mut self, pairs: &mut [f32], update: bool) {
        debug_assert_eq!(pairs.len(), 2 * self.mag_mean.len());
        let alpha = self.alpha;
        for (pair, mean) in pairs.chunks_exact_mut(2).zip(self.mag_mean.iter_mut()) {
            if update {
                let mag = (pair[0] * pair[0] + pair[1] * pair[1]).sqrt();
                *mean = alpha * *mean + (1.0 - alpha) * mag;
            }
            let scale = 1.0 / mean.max(self.min_mean);
            pair[0] *= scale;
            pair[1] *= scale;
        }
    }

    /// Undo [`normalize`](Self::normalize) using a snapshot of the means that
    /// were in force when the pairs were normalized.
    pub fn denormalize(pairs: &mut [f32], means: &[f32], min_mean: f32) {
        debug_assert_eq!(pairs.len(), 2 * means.len());
        for (pair, &mean) in pairs.chunks_exact_mut(2).zip(means) {
            let scale = mean.max(min_mean);
            pair[0] *= scale;
            pair[1] *= scale;
        }
    }

    pub fn means(&self) -> &[f32] {
        &self.mag_mean
    }

    pub fn min_mean(&self) -> f32 {
        self.min_mean
    }

    pub fn reset(&mut self) {
        self.mag_mean.fill(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_sub_update() {
        let mut norm = MeanSubNormalizer::new(2, 0.9);
        let mut x = [1.0f32, -2.0];
        norm.normalize(&mut x, true);
        assert!((norm.means()[0] - 0.1).abs() < 1e-6);
        assert!((norm.means()[1] + 0.2).abs() < 1e-6);
        assert!((x[0] - 0.9).abs() < 1e-6);
        assert!((x[1] + 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_mean_sub_frozen_without_update() {
        let mut norm = MeanSubNormalizer::new(3, 0.99);
        let mut x = [5.0f32; 3];
        norm.normalize(&mut x, true);
        let before = norm.means().to_vec();
        for _ in 0..100 {
            let mut y = [0.0f32; 3];
            norm.normalize(&mut y, false);
        }
        assert_eq!(norm.means(), &before[..]);
    }

    #[test]
    fn test_silence_idempotence() {
        // Zero input with the gate closed leaves both normalizers' state alone
        let mut mean_norm = MeanSubNormalizer::new(32, 0.99);
        let mut unit_norm = UnitMagNormalizer::new(481, 0.99, 1e-4);
        for _ in 0..1000 {
            let mut erb = [0.0f32; 32];
            let mut spec = vec![0.0f32; 481 * 2];
            mean_norm.normalize(&mut erb, false);
            unit_norm.normalize(&mut spec, false);
            assert!(erb.iter().all(|&v| v == 0.0));
            assert!(spec.iter().all(|&v| v == 0.0));
        }
        assert!(mean_norm.means().iter().all(|&m| m == 0.0));
        assert!(unit_norm.means().iter().all(|&m| m == 1.0));
    }

    #[test]
    fn test_unit_mag_update_and_scale() {
        let mut norm = UnitMagNormalizer::new(1, 0.5, 1e-4);
        let mut pair = [3.0f32, 4.0];
        norm.normalize(&mut pair, true);
        // mean = 0.5·1 + 0.5·5 = 3
        assert!((norm.means()[0] - 3.0).abs() < 1e-6);
        assert!((pair[0] - 1.0).abs() < 1e-6);
        assert!((pair[1] - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_unit_mag_floor() {
        let mut norm = UnitMagNormalizer::new(1, 0.5, 0.25);
        for _ in 0..64 {
            let mut zero = [0.0f32, 0.0];
            norm.normalize(&mut zero, true);
        }
        let mut pair = [1.0f32, 0.0];
        norm.normalize(&mut pair, false);
        assert!((pair[0] - 4.0).abs() < 1e-4);
    }

    #[test]
    fn test_unit_mag_invertible() {
        let mut norm = UnitMagNormalizer::new(3, 0.9, 1e-4);
        let original = [0.5f32, -0.25, 2.0, 1.0, 1e-3, 0.0];
        let mut pairs = original;
        norm.normalize(&mut pairs, true);
        let snapshot = norm.means().to_vec();
        UnitMagNormalizer::denormalize(&mut pairs, &snapshot, norm.min_mean());
        for (a, b) in pairs.iter().zip(&original) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_reset() {
        let mut mean_norm = MeanSubNormalizer::new(2, 0.5);
        let mut unit_norm = UnitMagNormalizer::new(2, 0.5, 1e-4);
        mean_norm.normalize(&mut [1.0, 1.0], true);
        unit_norm.normalize(&mut [1.0, 1.0, 3.0, 0.0], true);
        mean_norm.reset();
        unit_norm.reset();
        assert_eq!(mean_norm.means(), &[0.0, 0.0]);
        assert_eq!(unit_norm.means(), &[1.0, 1.0]);
    }
}
