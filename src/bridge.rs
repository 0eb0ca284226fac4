//! Glue between the feature pipeline and the stateful enhancement model.
//!
//! Once per hop the bridge hands the model the three feature histories plus its
//! recurrent hidden state, then turns the model's enhanced (normalized,
//! compressed) spectrum back into a linear spectrum ready for synthesis.
//! Any failure leaves the frame's spectrum exactly as analysed.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use num_complex::Complex32;
use thiserror::Error;

use crate::config::PipelineConfig;
use crate::features::FeatureExtractor;
use crate::pipeline::PipelineStats;
use crate::stft::{decompress, mirror_conjugate};
use crate::{DF_HIDDEN_LEN, ENC_HIDDEN_LEN, ERB_HIDDEN_LEN};

/// Why an inference call produced nothing usable. Never leaves the render path.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("tensor '{tensor}' has {actual} values, expected {expected}")]
    Shape {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("model produced no '{0}' output")]
    MissingOutput(&'static str),
    #[error("inference engine error: {0}")]
    Engine(String),
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for InferenceError {
    fn from(e: ort::Error) -> Self {
        InferenceError::Engine(e.to_string())
    }
}

/// Recurrent state threaded from one model call to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenState {
    pub enc: [f32; ENC_HIDDEN_LEN],
    pub erb: [f32; ERB_HIDDEN_LEN],
    pub df: [f32; DF_HIDDEN_LEN],
}

impl Default for HiddenState {
    fn default() -> Self {
        Self {
            enc: [0.0; ENC_HIDDEN_LEN],
            erb: [0.0; ERB_HIDDEN_LEN],
            df: [0.0; DF_HIDDEN_LEN],
        }
    }
}

impl HiddenState {
    pub fn slot(&self, slot: HiddenSlot) -> &[f32] {
        match slot {
            HiddenSlot::Encoder => &self.enc,
            HiddenSlot::Erb => &self.erb,
            HiddenSlot::Df => &self.df,
        }
    }

    pub fn slot_mut(&mut self, slot: HiddenSlot) -> &mut [f32] {
        match slot {
            HiddenSlot::Encoder => &mut self.enc,
            HiddenSlot::Erb => &mut self.erb,
            HiddenSlot::Df => &mut self.df,
        }
    }

    pub fn reset(&mut self) {
        self.enc.fill(0.0);
        self.erb.fill(0.0);
        self.df.fill(0.0);
    }
}

/// One of the model's three recurrent state vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiddenSlot {
    Encoder,
    Erb,
    Df,
}

impl HiddenSlot {
    pub const ALL: [HiddenSlot; 3] = [HiddenSlot::Encoder, HiddenSlot::Erb, HiddenSlot::Df];

    pub fn len(self) -> usize {
        match self {
            HiddenSlot::Encoder => ENC_HIDDEN_LEN,
            HiddenSlot::Erb => ERB_HIDDEN_LEN,
            HiddenSlot::Df => DF_HIDDEN_LEN,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Borrowed, oldest-first view of everything the model consumes for one frame.
///
/// Layouts (row-major, frames oldest first):
/// - `spec`: `history_len × bin_count × 2`
/// - `erb`: `history_len × erb_bands`
/// - `df_spec`: `history_len × df_bins × 2`
pub struct ModelInput<'a> {
    pub spec: &'a [f32],
    pub erb: &'a [f32],
    pub df_spec: &'a [f32],
    pub hidden: &'a HiddenState,
    pub history_len: usize,
    pub bin_count: usize,
    pub erb_bands: usize,
    pub df_bins: usize,
}

impl ModelInput<'_> {
    /// Newest frame of the compressed spectrum history.
    pub fn current_spec(&self) -> &[f32] {
        let frame = self.bin_count * 2;
        &self.spec[self.spec.len() - frame..]
    }
}

/// Pre-allocated landing area for one model call's results.
///
/// Engines copy their tensors in through the `write_*` methods, which check
/// lengths. A mismatching spectrum or mask is an error; a mismatching hidden
/// vector is silently ignored and the previous state is kept for that vector.
pub struct ModelOutput {
    enhanced_spec: Vec<f32>,
    mask: Vec<f32>,
    lsnr: Option<f32>,
    hidden: HiddenState,
    hidden_written: [bool; 3],
    spec_written: bool,
    mask_written: bool,
}

impl ModelOutput {
    pub fn new(bin_count: usize, erb_bands: usize) -> Self {
        Self {
            enhanced_spec: vec![0.0; bin_count * 2],
            mask: vec![0.0; erb_bands],
            lsnr: None,
            hidden: HiddenState::default(),
            hidden_written: [false; 3],
            spec_written: false,
            mask_written: false,
        }
    }

    fn begin(&mut self) {
        self.lsnr = None;
        self.hidden_written = [false; 3];
        self.spec_written = false;
        self.mask_written = false;
    }

    /// Enhanced spectrum, interleaved `[re, im, ..]`, `bin_count` pairs.
    pub fn write_enhanced_spec(&mut self, data: &[f32]) -> Result<(), InferenceError> {
        if data.len() != self.enhanced_spec.len() {
            return Err(InferenceError::Shape {
                tensor: "enhanced_spec",
                expected: self.enhanced_spec.len(),
                actual: data.len(),
            });
        }
        self.enhanced_spec.copy_from_slice(data);
        self.spec_written = true;
        Ok(())
    }

    /// ERB gain mask. Not applied; kept for diagnostics.
    pub fn write_mask(&mut self, data: &[f32]) -> Result<(), InferenceError> {
        if data.len() != self.mask.len() {
            return Err(InferenceError::Shape {
                tensor: "mask",
                expected: self.mask.len(),
                actual: data.len(),
            });
        }
        self.mask.copy_from_slice(data);
        self.mask_written = true;
        Ok(())
    }

    pub fn set_lsnr(&mut self, lsnr: f32) {
        self.lsnr = Some(lsnr);
    }

    /// Stage a new hidden vector. Returns `false` (and stages nothing) if the
    /// length does not match the slot.
    pub fn write_hidden(&mut self, slot: HiddenSlot, data: &[f32]) -> bool {
        if data.len() != slot.len() {
            return false;
        }
        self.hidden.slot_mut(slot).copy_from_slice(data);
        self.hidden_written[slot.index()] = true;
        true
    }

    pub fn enhanced_spec(&self) -> &[f32] {
        &self.enhanced_spec
    }

    pub fn mask(&self) -> Option<&[f32]> {
        self.mask_written.then_some(&self.mask[..])
    }

    pub fn lsnr(&self) -> Option<f32> {
        self.lsnr
    }
}

/// A stateful spectral enhancement model, called synchronously once per hop.
///
/// Implementations run on the render thread and should avoid allocation where
/// their backend allows it.
pub trait InferenceEngine: Send {
    fn infer(&mut self, input: &ModelInput<'_>, output: &mut ModelOutput)
        -> Result<(), InferenceError>;

    fn name(&self) -> &str {
        "engine"
    }
}

/// Identity model: returns the current normalized compressed spectrum and
/// carries the hidden state through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEngine;

impl InferenceEngine for PassthroughEngine {
    fn infer(
        &mut self,
        input: &ModelInput<'_>,
        output: &mut ModelOutput,
    ) -> Result<(), InferenceError> {
        output.write_enhanced_spec(input.current_spec())?;
        for slot in HiddenSlot::ALL {
            output.write_hidden(slot, input.hidden.slot(slot));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    AwaitingInference,
    Applying,
}

/// What happened to one frame's spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnhanceOutcome {
    /// Spectrum replaced by the model's output.
    Enhanced,
    /// No engine installed; spectrum untouched.
    Passthrough,
    /// Engine call failed; spectrum untouched.
    Failed,
    /// Watchdog cooldown after repeated overruns; spectrum untouched.
    Bypassed,
}

/// Times inference calls and backs off after sustained overruns.
struct Watchdog {
    budget: Duration,
    max_consecutive: u32,
    cooldown_frames: u32,
    consecutive: u32,
    cooldown_remaining: u32,
}

impl Watchdog {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            budget: config.inference_budget,
            max_consecutive: config.max_consecutive_overruns,
            cooldown_frames: config.overrun_cooldown_frames,
            consecutive: 0,
            cooldown_remaining: 0,
        }
    }

    /// Consume one cooldown frame if cooling down.
    fn in_cooldown(&mut self) -> bool {
        if self.cooldown_remaining > 0 {
            self.cooldown_remaining -= 1;
            true
        } else {
            false
        }
    }

    /// Record one call's duration. Returns `(overrun, tripped)`.
    fn record(&mut self, elapsed: Duration) -> (bool, bool) {
        if elapsed <= self.budget {
            self.consecutive = 0;
            return (false, false);
        }
        self.consecutive += 1;
        if self.max_consecutive > 0 && self.consecutive >= self.max_consecutive {
            self.consecutive = 0;
            self.cooldown_remaining = self.cooldown_frames;
            return (true, true);
        }
        (true, false)
    }

    fn reset(&mut self) {
        self.consecutive = 0;
        self.cooldown_remaining = 0;
    }
}

/// Drives the model once per frame.
///
/// `Idle → AwaitingInference → Applying → Idle`; at most one call in flight.
/// The unit-magnitude means in force when the features were computed are
/// snapshotted before the call and used to de-normalize the result.
pub struct EnhancementBridge {
    engine: Option<Box<dyn InferenceEngine>>,
    state: BridgeState,
    hidden: HiddenState,
    output: ModelOutput,
    mean_snapshot: Vec<f32>,
    min_mean: f32,
    compression: f32,

    // Oldest-first copies of the feature histories
    spec_in: Vec<f32>,
    erb_in: Vec<f32>,
    df_in: Vec<f32>,

    history_len: usize,
    bin_count: usize,
    erb_bands: usize,
    df_bins: usize,

    watchdog: Watchdog,
    last_error: Option<InferenceError>,
}

impl EnhancementBridge {
    pub fn new(config: &PipelineConfig, engine: Option<Box<dyn InferenceEngine>>) -> Self {
        let bin_count = config.bin_count();
        let history_len = config.history_len;
        match &engine {
            Some(e) => log::info!("Enhancement engine: {}", e.name()),
            None => log::info!("No enhancement engine, spectra pass through"),
        }

        Self {
            engine,
            state: BridgeState::Idle,
            hidden: HiddenState::default(),
            output: ModelOutput::new(bin_count, config.erb_bands),
            mean_snapshot: vec![1.0; bin_count],
            min_mean: config.min_unit_mean,
            compression: config.compression,
            spec_in: vec![0.0; history_len * bin_count * 2],
            erb_in: vec![0.0; history_len * config.erb_bands],
            df_in: vec![0.0; history_len * config.df_bins * 2],
            history_len,
            bin_count,
            erb_bands: config.erb_bands,
            df_bins: config.df_bins,
            watchdog: Watchdog::new(config),
            last_error: None,
        }
    }

    /// Run the model on the current features and, on success, overwrite the
    /// full-length `spectrum` with the enhanced, conjugate-symmetric result.
    pub fn enhance(
        &mut self,
        features: &FeatureExtractor,
        spectrum: &mut [Complex32],
        stats: &PipelineStats,
    ) -> EnhanceOutcome {
        debug_assert_eq!(spectrum.len(), 2 * (self.bin_count - 1));

        let Some(engine) = self.engine.as_mut() else {
            return EnhanceOutcome::Passthrough;
        };
        if self.watchdog.in_cooldown() {
            stats.bypassed_frames.fetch_add(1, Ordering::Relaxed);
            return EnhanceOutcome::Bypassed;
        }

        self.state = BridgeState::AwaitingInference;
        self.mean_snapshot.copy_from_slice(features.spec_norm().means());
        features.spec_history().copy_ordered(&mut self.spec_in);
        features.erb_history().copy_ordered(&mut self.erb_in);
        features.df_history().copy_ordered(&mut self.df_in);
        self.output.begin();

        let input = ModelInput {
            spec: &self.spec_in,
            erb: &self.erb_in,
            df_spec: &self.df_in,
            hidden: &self.hidden,
            history_len: self.history_len,
            bin_count: self.bin_count,
            erb_bands: self.erb_bands,
            df_bins: self.df_bins,
        };

        let start = Instant::now();
        let result = engine.infer(&input, &mut self.output);
        let elapsed = start.elapsed();

        stats
            .last_inference_ms
            .store(elapsed.as_secs_f32() * 1000.0, Ordering::Relaxed);
        let (overrun, tripped) = self.watchdog.record(elapsed);
        if overrun {
            stats.inference_overruns.fetch_add(1, Ordering::Relaxed);
        }
        if tripped {
            stats.watchdog_trips.fetch_add(1, Ordering::Relaxed);
        }

        let result = result.and_then(|()| {
            if self.output.spec_written {
                Ok(())
            } else {
                Err(InferenceError::MissingOutput("enhanced_spec"))
            }
        });
        if let Err(e) = result {
            stats.inference_failures.fetch_add(1, Ordering::Relaxed);
            // Held until taken so a stored message is never freed here
            if self.last_error.is_none() {
                self.last_error = Some(e);
            }
            self.state = BridgeState::Idle;
            return EnhanceOutcome::Failed;
        }

        self.state = BridgeState::Applying;
        self.apply_output(spectrum);
        if let Some(lsnr) = self.output.lsnr {
            stats.last_snr_db.store(lsnr, Ordering::Relaxed);
        }
        self.state = BridgeState::Idle;
        EnhanceOutcome::Enhanced
    }

    fn apply_output(&mut self, spectrum: &mut [Complex32]) {
        for slot in HiddenSlot::ALL {
            if self.output.hidden_written[slot.index()] {
                self.hidden
                    .slot_mut(slot)
                    .copy_from_slice(self.output.hidden.slot(slot));
            }
        }

        let pairs = self.output.enhanced_spec.chunks_exact(2);
        for ((bin, pair), &mean) in spectrum.iter_mut().zip(pairs).zip(&self.mean_snapshot) {
            let scale = mean.max(self.min_mean);
            let c = Complex32::new(pair[0] * scale, pair[1] * scale);
            *bin = decompress(c, self.compression);
        }
        mirror_conjugate(spectrum, self.bin_count);
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn hidden(&self) -> &HiddenState {
        &self.hidden
    }

    /// The model's last ERB mask, if it returned one.
    pub fn last_mask(&self) -> Option<&[f32]> {
        self.output.mask()
    }

    /// First inference failure since the error was last taken.
    pub fn last_error(&self) -> Option<&InferenceError> {
        self.last_error.as_ref()
    }

    /// Take the held failure so the next one can be recorded. Call from a
    /// non-real-time context; the error is dropped by the caller.
    pub fn take_last_error(&mut self) -> Option<InferenceError> {
        self.last_error.take()
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine_name(&self) -> Option<&str> {
        self.engine.as_ref().map(|e| e.name())
    }

    pub fn reset(&mut self) {
        self.state = BridgeState::Idle;
        self.hidden.reset();
        self.mean_snapshot.fill(1.0);
        self.watchdog.reset();
        self.last_error = None;
    }
}
