//! Triangular filterbank on the ERB (equivalent rectangular bandwidth) scale.
//!
//! Built once at startup; applying it is a dense `bands × bins` matrix-vector
//! product over the per-bin power spectrum.

/// Row-major `bands × bin_count` weight matrix.
pub struct ErbFilterbank {
    weights: Vec<f32>,
    bands: usize,
    bin_count: usize,
}

impl ErbFilterbank {
    /// Build `bands` triangular filters spaced evenly on the ERB scale between
    /// `min_freq` and Nyquist, for an FFT of `fft_size` at `sample_rate`.
    ///
    /// Band `b` has its centre at `min + b·(max − min)/(bands + 1)` (ERB units)
    /// and its edges at the neighbouring centres; the first band starts at
    /// `min_freq` and the last one ends at Nyquist. A band too narrow to cover
    /// any bin gets a single unit weight at its centre bin.
    pub fn new(bands: usize, sample_rate: f32, fft_size: usize, min_freq: f32) -> Self {
        let bin_count = fft_size / 2 + 1;
        let mut weights = vec![0.0f32; bands * bin_count];

        let hz_per_bin = sample_rate / fft_size as f32;
        let min_erb = freq_to_erb(min_freq);
        let max_erb = freq_to_erb(sample_rate / 2.0);
        let step = (max_erb - min_erb) / (bands + 1) as f32;

        for b in 0..bands {
            let center_erb = min_erb + b as f32 * step;
            let left_erb = if b == 0 { min_erb } else { min_erb + (b - 1) as f32 * step };
            let right_erb = if b == bands - 1 {
                max_erb
            } else {
                min_erb + (b + 1) as f32 * step
            };

            let bin_center = erb_to_freq(center_erb) / hz_per_bin;
            let bin_left = erb_to_freq(left_erb) / hz_per_bin;
            let bin_right = erb_to_freq(right_erb) / hz_per_bin;

            let row = &mut weights[b * bin_count..(b + 1) * bin_count];
            let mut band_sum = 0.0f32;
            for (k, w) in row.iter_mut().enumerate() {
                let f_bin = k as f32;
                let weight = if f_bin >= bin_left && f_bin <= bin_center {
                    (f_bin - bin_left) / (bin_center - bin_left).max(0.001)
                } else if f_bin > bin_center && f_bin <= bin_right {
                    (bin_right - f_bin) / (bin_right - bin_center).max(0.001)
                } else {
                    0.0
                };
                if weight > 0.0 {
                    *w = weight;
                    band_sum += weight;
                }
            }

            // Failsafe for narrow bands
            if band_sum <= 0.0 {
                let center = (bin_center.max(0.0) as usize).min(bin_count - 1);
                row[center] = 1.0;
            }
        }

        Self {
            weights,
            bands,
            bin_count,
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Weights of band `b`.
    pub fn row(&self, b: usize) -> &[f32] {
        &self.weights[b * self.bin_count..(b + 1) * self.bin_count]
    }

    /// `out[b] = Σ_k weights[b][k] · power[k]`.
    pub fn apply(&self, power: &[f32], out: &mut [f32]) {
        debug_assert_eq!(power.len(), self.bin_count);
        debug_assert_eq!(out.len(), self.bands);
        for (o, row) in out.iter_mut().zip(self.weights.chunks_exact(self.bin_count)) {
            *o = row.iter().zip(power).map(|(&w, &p)| w * p).sum();
        }
    }
}

/// Frequency (Hz) to ERB-rate.
pub fn freq_to_erb(f: f32) -> f32 {
    21.4 * (4.37 * f / 1000.0 + 1.0).log10()
}

/// ERB-rate to frequency (Hz).
pub fn erb_to_freq(e: f32) -> f32 {
    1000.0 / 4.37 * (10.0f32.powf(e / 21.4) - 1.0)
}
