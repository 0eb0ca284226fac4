//! Per-frame model features and their fixed-depth histories.

use num_complex::Complex32;

use crate::config::PipelineConfig;
use crate::erb::ErbFilterbank;
use crate::norm::{MeanSubNormalizer, UnitMagNormalizer};
use crate::stft::compress;

/// Added before the log of ERB band energies.
const LOG_EPS: f32 = 1e-10;

/// Fixed-depth FIFO of equally sized feature frames.
///
/// Stored as a ring with an explicit write cursor: pushing overwrites the
/// oldest frame in place, nothing is shifted. The history starts out filled
/// with zero frames, so it always reports `depth` frames.
pub struct FeatureHistory {
    data: Vec<f32>,
    frame_len: usize,
    depth: usize,
    /// Slot the next push goes to, which is also the oldest frame.
    write_idx: usize,
}

impl FeatureHistory {
    pub fn new(frame_len: usize, depth: usize) -> Self {
        Self {
            data: vec![0.0; frame_len * depth],
            frame_len,
            depth,
            write_idx: 0,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total number of values (`frame_len · depth`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Append one frame, evicting the oldest.
    pub fn push(&mut self, frame: &[f32]) {
        debug_assert_eq!(frame.len(), self.frame_len);
        let start = self.write_idx * self.frame_len;
        self.data[start..start + self.frame_len].copy_from_slice(frame);
        self.write_idx = (self.write_idx + 1) % self.depth;
    }

    /// Copy all frames into `out`, oldest first.
    pub fn copy_ordered(&self, out: &mut [f32]) {
        debug_assert_eq!(out.len(), self.data.len());
        let split = self.write_idx * self.frame_len;
        let tail = self.data.len() - split;
        out[..tail].copy_from_slice(&self.data[split..]);
        out[tail..].copy_from_slice(&self.data[..split]);
    }

    /// The most recently pushed frame.
    pub fn latest(&self) -> &[f32] {
        let idx = (self.write_idx + self.depth - 1) % self.depth;
        &self.data[idx * self.frame_len..(idx + 1) * self.frame_len]
    }

    pub fn reset(&mut self) {
        self.data.fill(0.0);
        self.write_idx = 0;
    }
}

/// Turns one analysis spectrum into the model's input features.
///
/// Per frame:
/// 1. per-bin power, and the energy gate (mean power above the threshold);
/// 2. ERB band energies → `log10` → running mean subtraction;
/// 3. compressed spectrum `c · (|c| + ε)^(p − 1)` → unit-magnitude normalization;
/// 4. push the ERB vector, the whole compressed spectrum and its low `df_bins`
///    bins into their histories.
///
/// Normalizer statistics only adapt while the gate is open.
pub struct FeatureExtractor {
    filterbank: ErbFilterbank,
    erb_norm: MeanSubNormalizer,
    spec_norm: UnitMagNormalizer,

    erb_history: FeatureHistory,
    spec_history: FeatureHistory,
    df_history: FeatureHistory,

    power: Vec<f32>,
    erb: Vec<f32>,
    /// Interleaved `[re, im, ..]` compressed spectrum of the current frame.
    compressed: Vec<f32>,

    bin_count: usize,
    df_bins: usize,
    compression: f32,
    gate_threshold: f32,
    gate_open: bool,
}

impl FeatureExtractor {
    pub fn new(config: &PipelineConfig) -> Self {
        let bin_count = config.bin_count();
        let filterbank = ErbFilterbank::new(
            config.erb_bands,
            config.sample_rate as f32,
            config.frame_size,
            config.erb_min_freq,
        );

        Self {
            filterbank,
            erb_norm: MeanSubNormalizer::new(config.erb_bands, config.norm_alpha),
            spec_norm: UnitMagNormalizer::new(bin_count, config.norm_alpha, config.min_unit_mean),
            erb_history: FeatureHistory::new(config.erb_bands, config.history_len),
            spec_history: FeatureHistory::new(bin_count * 2, config.history_len),
            df_history: FeatureHistory::new(config.df_bins * 2, config.history_len),
            power: vec![0.0; bin_count],
            erb: vec![0.0; config.erb_bands],
            compressed: vec![0.0; bin_count * 2],
            bin_count,
            df_bins: config.df_bins,
            compression: config.compression,
            gate_threshold: config.gate_threshold,
            gate_open: false,
        }
    }

    /// Extract features from the first `bin_count` bins of one analysis frame.
    ///
    /// Returns whether the energy gate was open for this frame.
    pub fn process(&mut self, bins: &[Complex32]) -> bool {
        debug_assert_eq!(bins.len(), self.bin_count);

        let mut energy = 0.0f32;
        for (p, c) in self.power.iter_mut().zip(bins) {
            *p = c.norm_sqr();
            energy += *p;
        }
        self.gate_open = energy / self.bin_count as f32 > self.gate_threshold;

        // ERB branch
        self.filterbank.apply(&self.power, &mut self.erb);
        for e in self.erb.iter_mut() {
            *e = (*e + LOG_EPS).log10();
        }
        self.erb_norm.normalize(&mut self.erb, self.gate_open);

        // Complex branch
        for (pair, &c) in self.compressed.chunks_exact_mut(2).zip(bins) {
            let v = compress(c, self.compression);
            pair[0] = v.re;
            pair[1] = v.im;
        }
        self.spec_norm.normalize(&mut self.compressed, self.gate_open);

        self.erb_history.push(&self.erb);
        self.spec_history.push(&self.compressed);
        self.df_history.push(&self.compressed[..self.df_bins * 2]);

        self.gate_open
    }

    pub fn erb_history(&self) -> &FeatureHistory {
        &self.erb_history
    }

    pub fn spec_history(&self) -> &FeatureHistory {
        &self.spec_history
    }

    pub fn df_history(&self) -> &FeatureHistory {
        &self.df_history
    }

    /// Normalizer of the compressed spectrum; its means de-normalize model output.
    pub fn spec_norm(&self) -> &UnitMagNormalizer {
        &self.spec_norm
    }

    pub fn erb_norm(&self) -> &MeanSubNormalizer {
        &self.erb_norm
    }

    pub fn gate_open(&self) -> bool {
        self.gate_open
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    pub fn reset(&mut self) {
        self.erb_norm.reset();
        self.spec_norm.reset();
        self.erb_history.reset();
        self.spec_history.reset();
        self.df_history.reset();
        self.gate_open = false;
    }
}
