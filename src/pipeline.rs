//! Pipeline assembly: the STFT enhancer, the render entry point and the
//! capture-side writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use num_complex::Complex32;

use crate::bridge::{EnhancementBridge, InferenceEngine};
use crate::config::PipelineConfig;
use crate::features::FeatureExtractor;
use crate::framer::Framer;
use crate::latency::{apply_gain, GainControl, LatencyController};
use crate::ola::{HopFifo, OlaSynthesizer};
use crate::queue::SampleQueue;
use crate::stft::SpectralTransform;
use crate::Result;

/// Counters and gauges written on the audio threads, read anywhere.
pub struct PipelineStats {
    pub frames_processed: AtomicU64,
    pub inference_failures: AtomicU64,
    pub inference_overruns: AtomicU64,
    pub watchdog_trips: AtomicU64,
    /// Frames that skipped inference during a watchdog cooldown.
    pub bypassed_frames: AtomicU64,
    pub queue_overflows: AtomicU64,
    pub queue_underruns: AtomicU64,
    pub trimmed_samples: AtomicU64,
    /// Render calls partly or fully zero-filled because too few synthesized
    /// samples were ready.
    pub output_starvation: AtomicU64,
    pub input_level_db: AtomicF32,
    pub last_snr_db: AtomicF32,
    pub last_inference_ms: AtomicF32,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            frames_processed: AtomicU64::new(0),
            inference_failures: AtomicU64::new(0),
            inference_overruns: AtomicU64::new(0),
            watchdog_trips: AtomicU64::new(0),
            bypassed_frames: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            queue_underruns: AtomicU64::new(0),
            trimmed_samples: AtomicU64::new(0),
            output_starvation: AtomicU64::new(0),
            input_level_db: AtomicF32::new(-100.0),
            last_snr_db: AtomicF32::new(0.0),
            last_inference_ms: AtomicF32::new(0.0),
        }
    }

    /// Report the counters through `log`. Call from a control thread, never
    /// from the audio callback.
    pub fn log_summary(&self) {
        let failures = self.inference_failures.load(Ordering::Relaxed);
        let overruns = self.inference_overruns.load(Ordering::Relaxed);
        let trips = self.watchdog_trips.load(Ordering::Relaxed);
        log::info!(
            "frames={} input={:.1}dB snr={:.1}dB inference={:.2}ms",
            self.frames_processed.load(Ordering::Relaxed),
            self.input_level_db.load(Ordering::Relaxed),
            self.last_snr_db.load(Ordering::Relaxed),
            self.last_inference_ms.load(Ordering::Relaxed),
        );
        log::info!(
            "queue: overflows={} underruns={} trimmed={} starved={}",
            self.queue_overflows.load(Ordering::Relaxed),
            self.queue_underruns.load(Ordering::Relaxed),
            self.trimmed_samples.load(Ordering::Relaxed),
            self.output_starvation.load(Ordering::Relaxed),
        );
        if failures > 0 || overruns > 0 {
            log::warn!(
                "inference: failures={} overruns={} watchdog_trips={} bypassed={}",
                failures,
                overruns,
                trips,
                self.bypassed_frames.load(Ordering::Relaxed),
            );
        }
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// RMS level of `samples` in dBFS, floored at -100.
pub fn rms_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return -100.0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    let rms = (sum_sq / samples.len() as f32).sqrt();
    if rms < 1e-5 {
        -100.0
    } else {
        20.0 * rms.log10()
    }
}

/// The streaming STFT engine: framing, analysis, features, model, synthesis
/// and overlap-add, turning arbitrary-sized input blocks into equally sized
/// output blocks.
///
/// Output lags input by the samples zero-filled while the synthesized FIFO
/// was short: `frame_size − hop_size` when blocks are a multiple of the hop,
/// up to one more hop otherwise.
///
/// ```ignore
/// let stats = Arc::new(PipelineStats::new());
/// let mut enhancer = StreamingEnhancer::new(&config, None, stats)?;
/// enhancer.process(&input, &mut output, 1.0);
/// ```
pub struct StreamingEnhancer {
    framer: Framer,
    transform: SpectralTransform,
    features: FeatureExtractor,
    bridge: EnhancementBridge,
    ola: OlaSynthesizer,
    fifo: HopFifo,

    // Pre-allocated per-frame buffers
    frame: Vec<f32>,
    spectrum: Vec<Complex32>,
    synth: Vec<f32>,
    hop: Vec<f32>,

    bin_count: usize,
    max_block_size: usize,
    stats: Arc<PipelineStats>,
}

impl StreamingEnhancer {
    pub fn new(
        config: &PipelineConfig,
        engine: Option<Box<dyn InferenceEngine>>,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        config.validate()?;
        let frame_size = config.frame_size;
        let hop_size = config.hop_size;
        log::info!(
            "Streaming enhancer: {} Hz, frame {}, hop {}, {} ERB bands, delay {:.1} ms",
            config.sample_rate,
            frame_size,
            hop_size,
            config.erb_bands,
            config.stft_delay() as f32 * 1000.0 / config.sample_rate as f32
        );

        Ok(Self {
            framer: Framer::new(frame_size, hop_size, config.max_block_size),
            transform: SpectralTransform::new(frame_size),
            features: FeatureExtractor::new(config),
            bridge: EnhancementBridge::new(config, engine),
            ola: OlaSynthesizer::new(frame_size, hop_size),
            fifo: HopFifo::new(4 * config.max_block_size + 2 * frame_size),
            frame: vec![0.0; frame_size],
            spectrum: vec![Complex32::new(0.0, 0.0); frame_size],
            synth: vec![0.0; frame_size],
            hop: vec![0.0; hop_size],
            bin_count: config.bin_count(),
            max_block_size: config.max_block_size,
            stats,
        })
    }

    /// Consume `input` and fill all of `output`.
    ///
    /// Blocks longer than `max_block_size` are split. When fewer synthesized
    /// samples are ready than a block asks for, the ready ones are delivered
    /// and only the remainder is zero-filled. `output` should be as long as
    /// `input`; any extra tail is zeroed.
    pub fn process(&mut self, input: &[f32], output: &mut [f32], output_gain: f32) {
        let len = input.len().min(output.len());
        let (output, tail) = output.split_at_mut(len);
        tail.fill(0.0);

        let block = self.max_block_size;
        for (inp, out) in input[..len].chunks(block).zip(output.chunks_mut(block)) {
            self.process_block(inp, out, output_gain);
        }
    }

    fn process_block(&mut self, input: &[f32], output: &mut [f32], output_gain: f32) {
        self.framer.push(input);
        while self.framer.next_frame(&mut self.frame) {
            self.process_frame(output_gain);
        }

        let ready = self.fifo.pop_into(output);
        if ready < output.len() {
            output[ready..].fill(0.0);
            self.stats.output_starvation.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn process_frame(&mut self, output_gain: f32) {
        self.transform.analysis(&self.frame, &mut self.spectrum);
        self.features.process(&self.spectrum[..self.bin_count]);
        self.bridge
            .enhance(&self.features, &mut self.spectrum, &self.stats);
        self.transform
            .synthesis(&mut self.spectrum, output_gain, &mut self.synth);
        self.ola.add_frame(&self.synth, &mut self.hop);

        let pushed = self.fifo.push(&self.hop);
        debug_assert!(pushed, "synthesized sample FIFO overflow");
        self.stats.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Clear every piece of streaming state. Allocates nothing.
    pub fn reset(&mut self) {
        self.framer.reset();
        self.features.reset();
        self.bridge.reset();
        self.ola.reset();
        self.fifo.reset();
    }

    pub fn bridge(&self) -> &EnhancementBridge {
        &self.bridge
    }

    pub fn features(&self) -> &FeatureExtractor {
        &self.features
    }

    /// Synthesized samples waiting to be delivered.
    pub fn pending_output(&self) -> usize {
        self.fifo.len()
    }
}

/// Render-thread owner of the whole pipeline.
///
/// Each [`render`](Self::render) call trims the capture backlog, reads one
/// callback worth of samples, applies the input gain, runs the enhancer (or
/// bypasses it) and writes the callback buffer in full.
pub struct RenderPipeline {
    queue: Arc<SampleQueue>,
    enhancer: StreamingEnhancer,
    latency: LatencyController,
    gains: Arc<GainControl>,
    stats: Arc<PipelineStats>,
    scratch: Vec<f32>,
    max_block_size: usize,
    was_enhancing: bool,
}

impl RenderPipeline {
    pub fn new(
        config: &PipelineConfig,
        queue: Arc<SampleQueue>,
        engine: Option<Box<dyn InferenceEngine>>,
    ) -> Result<Self> {
        let stats = Arc::new(PipelineStats::new());
        let enhancer = StreamingEnhancer::new(config, engine, Arc::clone(&stats))?;
        log::info!(
            "Render pipeline: target latency {} samples, queue capacity {}",
            config.target_latency,
            queue.capacity()
        );

        Ok(Self {
            queue,
            enhancer,
            latency: LatencyController::new(config.target_latency),
            gains: Arc::new(GainControl::new(config.input_gain, config.output_gain)),
            stats,
            scratch: vec![0.0; config.max_block_size],
            max_block_size: config.max_block_size,
            was_enhancing: true,
        })
    }

    /// Fill `output` with the next block of processed audio.
    ///
    /// On queue underflow the block is silence and the enhancer is not fed.
    pub fn render(&mut self, output: &mut [f32]) {
        let trimmed = self.latency.trim(&self.queue, output.len());
        if trimmed > 0 {
            self.stats
                .trimmed_samples
                .fetch_add(trimmed as u64, Ordering::Relaxed);
        }

        // Only this thread reads, so the count cannot shrink below this check
        if self.queue.count() < output.len() {
            output.fill(0.0);
            self.stats.queue_underruns.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let input_gain = self.gains.input_gain();
        let output_gain = self.gains.output_gain();
        let enhance = self.gains.enhance_enabled();
        if enhance && !self.was_enhancing {
            self.enhancer.reset();
        }
        self.was_enhancing = enhance;

        for chunk in output.chunks_mut(self.max_block_size) {
            let n = chunk.len();
            let read = self.queue.read(chunk);
            debug_assert!(read);
            apply_gain(chunk, input_gain);

            if enhance {
                let input = &mut self.scratch[..n];
                input.copy_from_slice(chunk);
                self.enhancer.process(input, chunk, output_gain);
            } else {
                apply_gain(chunk, output_gain);
            }
        }
    }

    /// A handle for the capture thread.
    pub fn capture_writer(&self) -> CaptureWriter {
        CaptureWriter {
            queue: Arc::clone(&self.queue),
            stats: Arc::clone(&self.stats),
        }
    }

    pub fn gains(&self) -> &Arc<GainControl> {
        &self.gains
    }

    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.stats
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn latency(&self) -> &LatencyController {
        &self.latency
    }

    pub fn enhancer(&self) -> &StreamingEnhancer {
        &self.enhancer
    }

    pub fn enhancer_mut(&mut self) -> &mut StreamingEnhancer {
        &mut self.enhancer
    }
}

/// Capture-side handle: meters and enqueues 48 kHz mono samples.
#[derive(Clone)]
pub struct CaptureWriter {
    queue: Arc<SampleQueue>,
    stats: Arc<PipelineStats>,
}

impl CaptureWriter {
    /// Enqueue one captured block. Returns `false` (block dropped, overflow
    /// counted) if the queue is full.
    pub fn push(&self, samples: &[f32]) -> bool {
        self.stats
            .input_level_db
            .store(rms_db(samples), Ordering::Relaxed);
        let ok = self.queue.write(samples);
        if !ok {
            self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }
}
