//! # MetalVoice-RT
//!
//! Real-time streaming noise suppression core for a 48 kHz mono microphone path.
//!
//! The crate implements everything around a stateful spectral enhancement model
//! (DeepFilterNet3 streaming export): the capture → render sample queue, STFT
//! framing with square-root Hann windows, ERB and compressed-spectrum features
//! with fixed-depth histories, adaptive online normalizers, the bridge that
//! threads hidden state through the model, and overlap-add synthesis.
//!
//! The model itself is consumed through the [`InferenceEngine`] trait. Enable the
//! `onnx` feature for an ONNX Runtime backed implementation, or use
//! [`PassthroughEngine`] / no engine at all for bring-up.
//!
//! ## Quick Start
//!
//! ```ignore
//! use metalvoice_rt::{PipelineConfig, RenderPipeline, SampleQueue};
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::default();
//! let queue = Arc::new(SampleQueue::new(config.queue_capacity)?);
//! let mut render = RenderPipeline::new(&config, queue, None)?;
//! let capture = render.capture_writer();
//!
//! // capture thread
//! capture.push(&mic_samples_48k_mono);
//!
//! // playback callback
//! render.render(&mut device_buffer);
//! ```
//!
//! ## Threading
//!
//! Two contexts touch the pipeline:
//!
//! - **Capture**: [`CaptureWriter::push`] writes converted samples into the
//!   [`SampleQueue`]. This is the only operation allowed off the render thread.
//! - **Render**: [`RenderPipeline::render`] trims latency, reads one callback
//!   worth of samples, runs the STFT engine and writes the output buffer.
//!
//! [`SampleQueue`] is the single synchronization point (one short
//! `parking_lot` lock per call). Everything else is owned by the render side.
//! Gains and the enhancement toggle live in [`GainControl`] atomics and can be
//! changed from any thread.
//!
//! ## Audio Requirements
//!
//! - **Sample rate**: 48 kHz (resample before [`CaptureWriter::push`])
//! - **Format**: Mono f32 samples in range [-1.0, 1.0]
//!
//! ## Real-time Rules
//!
//! After construction the pipeline itself never allocates, blocks on anything
//! but the queue lock, logs, or panics on the render path. Inference engines
//! may allocate per call (ONNX Runtime takes ownership of its input tensors).
//! Failures are recovered locally and counted in [`PipelineStats`]; call
//! [`PipelineStats::log_summary`] from a control thread to report them.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for construction and diagnostic messages.
//! Install any logger (e.g. `env_logger`) in the host application.

pub mod bridge;
pub mod config;
pub mod erb;
pub mod features;
pub mod framer;
pub mod latency;
pub mod norm;
pub mod ola;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pipeline;
pub mod queue;
pub mod stft;

use thiserror::Error;

pub use bridge::{
    BridgeState, EnhanceOutcome, EnhancementBridge, HiddenSlot, HiddenState, InferenceEngine,
    InferenceError, ModelInput, ModelOutput, PassthroughEngine,
};
pub use config::PipelineConfig;
pub use erb::ErbFilterbank;
pub use features::{FeatureExtractor, FeatureHistory};
pub use framer::Framer;
pub use latency::{GainControl, LatencyController};
pub use norm::{MeanSubNormalizer, UnitMagNormalizer};
pub use ola::{HopFifo, OlaSynthesizer};
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;
pub use pipeline::{CaptureWriter, PipelineStats, RenderPipeline, StreamingEnhancer};
pub use queue::SampleQueue;
pub use stft::SpectralTransform;

// Common parameters of the DeepFilterNet3 streaming export
pub const SAMPLE_RATE: usize = 48000;
pub const FFT_SIZE: usize = 960;
pub const HOP_SIZE: usize = 480;
pub const FREQ_SIZE: usize = FFT_SIZE / 2 + 1;
pub const NB_ERB: usize = 32;
pub const NB_DF: usize = 96;
/// Frames kept in each feature history.
pub const HISTORY_LEN: usize = 10;
pub const DEFAULT_NORM_ALPHA: f32 = 0.99;
/// Spectral compression exponent the model was trained with.
pub const COMPRESSION_EXP: f32 = 0.6;
/// Hidden width of every recurrent layer in the model.
pub const HIDDEN_DIM: usize = 256;
pub const ENC_HIDDEN_LEN: usize = HIDDEN_DIM;
pub const ERB_HIDDEN_LEN: usize = 2 * HIDDEN_DIM;
pub const DF_HIDDEN_LEN: usize = 2 * HIDDEN_DIM;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Onnx(#[from] ort::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Compile-time check: the capture side is shared across threads, the render
// side is moved onto the audio thread once.
fn _assert_send<T: Send>() {}
fn _assert_sync<T: Sync>() {}
fn _assert_thread_bounds() {
    _assert_send::<RenderPipeline>();
    _assert_send::<CaptureWriter>();
    _assert_sync::<SampleQueue>();
    _assert_sync::<GainControl>();
    _assert_sync::<PipelineStats>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(FFT_SIZE / 2 + 1, FREQ_SIZE);
        assert_eq!(FFT_SIZE, 2 * HOP_SIZE);
        assert!(NB_DF <= FREQ_SIZE);
    }
}
