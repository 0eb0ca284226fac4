//! Pipeline configuration.
//!
//! One explicitly constructed [`PipelineConfig`] is passed by reference into
//! every constructor; nothing reads process-wide state. Values can be loaded
//! from a `config.ini`-style file (same layout as model configs: `key = value`,
//! `[section]` headers and `#` comments ignored).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::{
    Error, Result, COMPRESSION_EXP, DEFAULT_NORM_ALPHA, FFT_SIZE, HISTORY_LEN, HOP_SIZE, NB_DF,
    NB_ERB, SAMPLE_RATE,
};

/// Runtime parameters of one pipeline instance.
///
/// Everything is fixed at construction except `input_gain` / `output_gain`,
/// which only seed the shared [`GainControl`](crate::GainControl).
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub sample_rate: usize,
    pub frame_size: usize,
    pub hop_size: usize,
    pub erb_bands: usize,
    /// Bins of the truncated compressed spectrum history.
    pub df_bins: usize,
    pub history_len: usize,
    pub compression: f32,
    pub norm_alpha: f32,
    /// Mean bin power above which normalizer statistics may adapt.
    pub gate_threshold: f32,
    /// Floor of the unit-magnitude normalizer denominator.
    pub min_unit_mean: f32,
    /// Low cutoff of the ERB filterbank in Hz.
    pub erb_min_freq: f32,
    /// Steady-state queue depth the render side trims down to, in samples.
    pub target_latency: usize,
    pub input_gain: f32,
    pub output_gain: f32,
    pub queue_capacity: usize,
    /// Largest block processed in one go; longer render calls are split.
    pub max_block_size: usize,
    pub inference_budget: Duration,
    pub max_consecutive_overruns: u32,
    pub overrun_cooldown_frames: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_size: FFT_SIZE,
            hop_size: HOP_SIZE,
            erb_bands: NB_ERB,
            df_bins: NB_DF,
            history_len: HISTORY_LEN,
            compression: COMPRESSION_EXP,
            norm_alpha: DEFAULT_NORM_ALPHA,
            gate_threshold: 1e-6,
            min_unit_mean: 1e-4,
            erb_min_freq: 100.0,
            target_latency: 2400,
            input_gain: 1.0,
            output_gain: 1.0,
            queue_capacity: SAMPLE_RATE * 5,
            max_block_size: 4096,
            inference_budget: Duration::from_millis(10),
            max_consecutive_overruns: 4,
            overrun_cooldown_frames: 100,
        }
    }
}

impl PipelineConfig {
    /// Number of complex bins produced per frame.
    pub fn bin_count(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Algorithmic latency of the STFT engine in samples (one frame minus one hop).
    pub fn stft_delay(&self) -> usize {
        self.frame_size - self.hop_size
    }

    /// Reject parameter sets the streaming engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 || self.frame_size % 2 != 0 {
            return Err(Error::Config(format!(
                "frame_size must be even and nonzero, got {}",
                self.frame_size
            )));
        }
        // sqrt-Hann analysis/synthesis only sums to unity at 50% overlap
        if self.hop_size == 0 || self.frame_size != 2 * self.hop_size {
            return Err(Error::Config(format!(
                "frame_size / hop_size must be 2, got {} / {}",
                self.frame_size, self.hop_size
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be nonzero".to_string()));
        }
        if self.max_block_size == 0 {
            return Err(Error::Config("max_block_size must be nonzero".to_string()));
        }
        if self.erb_bands == 0 {
            return Err(Error::Config("erb_bands must be at least 1".to_string()));
        }
        if self.df_bins == 0 || self.df_bins > self.bin_count() {
            return Err(Error::Config(format!(
                "df_bins must be in 1..={}, got {}",
                self.bin_count(),
                self.df_bins
            )));
        }
        if self.history_len == 0 {
            return Err(Error::Config("history_len must be at least 1".to_string()));
        }
        if !(self.erb_min_freq > 0.0) || self.sample_rate as f32 <= 2.0 * self.erb_min_freq {
            return Err(Error::Config(format!(
                "sample_rate {} must exceed twice erb_min_freq {}",
                self.sample_rate, self.erb_min_freq
            )));
        }
        if !(self.norm_alpha > 0.0 && self.norm_alpha < 1.0) {
            return Err(Error::Config(format!(
                "norm_alpha must be in (0, 1), got {}",
                self.norm_alpha
            )));
        }
        if !(self.compression > 0.0 && self.compression <= 1.0) {
            return Err(Error::Config(format!(
                "compression must be in (0, 1], got {}",
                self.compression
            )));
        }
        if !(self.min_unit_mean > 0.0) {
            return Err(Error::Config("min_unit_mean must be positive".to_string()));
        }
        Ok(())
    }

    /// Load a configuration file, starting from the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_ini_str(&content)
    }

    /// Parse `key = value` pairs over the defaults and validate the result.
    ///
    /// `norm_tau` (seconds) is accepted as an alternative to `norm_alpha` and
    /// converted with the hop duration, rounded the way the model's training
    /// code does it.
    pub fn from_ini_str(content: &str) -> Result<Self> {
        let params = parse_ini(content);
        let mut config = Self::default();

        set_from(&params, "sample_rate", &mut config.sample_rate)?;
        set_from(&params, "frame_size", &mut config.frame_size)?;
        set_from(&params, "hop_size", &mut config.hop_size)?;
        set_from(&params, "erb_bands", &mut config.erb_bands)?;
        set_from(&params, "df_bins", &mut config.df_bins)?;
        set_from(&params, "history_len", &mut config.history_len)?;
        set_from(&params, "compression", &mut config.compression)?;
        set_from(&params, "norm_alpha", &mut config.norm_alpha)?;
        set_from(&params, "gate_threshold", &mut config.gate_threshold)?;
        set_from(&params, "min_unit_mean", &mut config.min_unit_mean)?;
        set_from(&params, "erb_min_freq", &mut config.erb_min_freq)?;
        set_from(&params, "target_latency", &mut config.target_latency)?;
        set_from(&params, "input_gain", &mut config.input_gain)?;
        set_from(&params, "output_gain", &mut config.output_gain)?;
        set_from(&params, "queue_capacity", &mut config.queue_capacity)?;
        set_from(&params, "max_block_size", &mut config.max_block_size)?;
        set_from(&params, "max_consecutive_overruns", &mut config.max_consecutive_overruns)?;
        set_from(&params, "overrun_cooldown_frames", &mut config.overrun_cooldown_frames)?;

        let mut budget_ms = config.inference_budget.as_secs_f32() * 1000.0;
        if params.contains_key("inference_budget_ms") {
            set_from(&params, "inference_budget_ms", &mut budget_ms)?;
            if !(budget_ms > 0.0) {
                return Err(Error::Config("inference_budget_ms must be positive".to_string()));
            }
            config.inference_budget = Duration::from_secs_f32(budget_ms / 1000.0);
        }

        if !params.contains_key("norm_alpha") && params.contains_key("norm_tau") {
            let mut tau = 1.0f32;
            set_from(&params, "norm_tau", &mut tau)?;
            config.norm_alpha = norm_alpha_from_tau(tau, config.hop_size, config.sample_rate);
        }

        config.validate()?;
        log::debug!("Pipeline config: {:?}", config);
        Ok(config)
    }
}

/// Leak rate for a normalizer time constant `tau` (seconds) at the given hop.
pub fn norm_alpha_from_tau(tau: f32, hop_size: usize, sample_rate: usize) -> f32 {
    let dt = hop_size as f32 / sample_rate as f32;
    let a = f32::exp(-dt / tau);
    // Keep the fewest decimals that still round below 1.0
    let mut precision: u32 = 3;
    let mut rounded = 1.0f32;
    while rounded >= 1.0 && precision < 10 {
        let scale = 10f32.powi(precision as i32);
        rounded = (a * scale).round() / scale;
        precision += 1;
    }
    rounded
}

/// Flatten an INI file into `key -> value`.
///
/// Section headers are dropped so the `[df]`/`[train]` layout shipped next to
/// DeepFilterNet models and a flat file of pipeline overrides read the same
/// way. Lines starting with `#` or `;` are comments; a later key wins.
fn parse_ini(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(['[', '#', ';']))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn set_from<T: FromStr>(params: &HashMap<String, String>, key: &str, slot: &mut T) -> Result<()> {
    if let Some(raw) = params.get(key) {
        *slot = raw
            .parse::<T>()
            .map_err(|_| Error::Config(format!("invalid value for {}: '{}'", key, raw)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bin_count(), 481);
        assert_eq!(config.stft_delay(), 480);
    }

    #[test]
    fn test_rejects_bad_ratio() {
        let config = PipelineConfig {
            hop_size: 240,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let config = PipelineConfig {
            queue_capacity: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_df_bins() {
        let config = PipelineConfig {
            df_bins: 482,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_ini() {
        let ini = "\
[df]
# streaming settings
frame_size = 480
hop_size = 240
erb_bands = 24
target_latency = 1200
inference_budget_ms = 4.5
unknown_key = whatever
";
        let config = PipelineConfig::from_ini_str(ini).unwrap();
        assert_eq!(config.frame_size, 480);
        assert_eq!(config.hop_size, 240);
        assert_eq!(config.erb_bands, 24);
        assert_eq!(config.target_latency, 1200);
        assert!((config.inference_budget.as_secs_f32() - 0.0045).abs() < 1e-6);
        // untouched keys keep defaults
        assert_eq!(config.df_bins, NB_DF);
    }

    #[test]
    fn test_parse_ini_flattens_sections() {
        let ini = "\
[df]
erb_bands = 32
; disabled
;hop_size = 1
[train]
  erb_bands = 24
no equals sign here
";
        let map = parse_ini(ini);
        assert_eq!(map.len(), 1);
        assert_eq!(map["erb_bands"], "24");
    }

    #[test]
    fn test_from_ini_malformed_number() {
        let err = PipelineConfig::from_ini_str("frame_size = lots").unwrap_err();
        assert!(err.to_string().contains("frame_size"));
    }

    #[test]
    fn test_from_ini_validates() {
        assert!(PipelineConfig::from_ini_str("hop_size = 320").is_err());
    }

    #[test]
    fn test_norm_tau() {
        let config = PipelineConfig::from_ini_str("norm_tau = 1").unwrap();
        // exp(-0.01) = 0.99005 -> 0.990
        assert!((config.norm_alpha - 0.99).abs() < 1e-6);
    }
}
