use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use metalvoice_rt::{
    PassthroughEngine, PipelineConfig, PipelineStats, RenderPipeline, SampleQueue,
    StreamingEnhancer, SAMPLE_RATE,
};

fn sine(n: usize, freq: f32, amp: f32) -> Vec<f32> {
    (0..n)
        .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
        .collect()
}

/// Deterministic broadband test signal.
fn noise(n: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 8) as f32 / (1u32 << 24) as f32 - 0.5
        })
        .collect()
}

fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Frequency from linearly interpolated rising zero crossings.
fn zero_crossing_freq(samples: &[f32]) -> f32 {
    let mut crossings = Vec::new();
    for i in 1..samples.len() {
        if samples[i - 1] < 0.0 && samples[i] >= 0.0 {
            let frac = -samples[i - 1] / (samples[i] - samples[i - 1]);
            crossings.push((i - 1) as f32 + frac);
        }
    }
    let first = crossings[0];
    let last = crossings[crossings.len() - 1];
    (crossings.len() - 1) as f32 * SAMPLE_RATE as f32 / (last - first)
}

#[test]
fn sine_passthrough_keeps_frequency_and_level() {
    let config = PipelineConfig::default();
    let queue = Arc::new(SampleQueue::new(config.queue_capacity).unwrap());
    let mut render =
        RenderPipeline::new(&config, queue, Some(Box::new(PassthroughEngine))).unwrap();
    let capture = render.capture_writer();

    let input = sine(SAMPLE_RATE, 1000.0, 0.5);
    let mut output = vec![0.0f32; input.len()];
    for (inp, out) in input.chunks(480).zip(output.chunks_mut(480)) {
        assert!(capture.push(inp));
        render.render(out);
    }

    // Skip start-up: one empty block plus the first partial frame
    let steady_out = &output[1440..];
    let steady_in = &input[960..input.len() - 480];
    let level_ratio = rms(steady_out) / rms(steady_in);
    assert!((level_ratio - 1.0).abs() < 0.01, "level ratio {}", level_ratio);

    let freq = zero_crossing_freq(steady_out);
    assert!((freq - 1000.0).abs() < 10.0, "frequency {}", freq);

    let stats = render.stats();
    assert_eq!(stats.inference_failures.load(Ordering::Relaxed), 0);
    assert_eq!(stats.queue_underruns.load(Ordering::Relaxed), 0);
    assert_eq!(stats.frames_processed.load(Ordering::Relaxed), 99);
}

#[test]
fn ola_identity_round_trip_has_stft_delay() {
    let config = PipelineConfig::default();
    let stats = Arc::new(PipelineStats::new());
    let mut enhancer =
        StreamingEnhancer::new(&config, Some(Box::new(PassthroughEngine)), Arc::clone(&stats))
            .unwrap();

    let input = noise(SAMPLE_RATE / 2, 7);
    let mut output = vec![0.0f32; input.len()];
    for (inp, out) in input.chunks(480).zip(output.chunks_mut(480)) {
        enhancer.process(inp, out, 1.0);
    }

    let delay = config.stft_delay();
    assert_eq!(delay, 480);
    let mut max_err = 0.0f32;
    for t in 2 * delay..input.len() {
        max_err = max_err.max((output[t] - input[t - delay]).abs());
    }
    assert!(max_err < 1e-3, "max reconstruction error {}", max_err);
    assert_eq!(stats.inference_failures.load(Ordering::Relaxed), 0);
}

#[test]
fn block_size_not_multiple_of_hop_stays_continuous() {
    let config = PipelineConfig::default();
    let stats = Arc::new(PipelineStats::new());
    let mut enhancer = StreamingEnhancer::new(&config, None, Arc::clone(&stats)).unwrap();

    let block = 441;
    let input = sine(SAMPLE_RATE / 2, 440.0, 0.5);
    let mut output = vec![0.0f32; input.len()];
    for (inp, out) in input.chunks(block).zip(output.chunks_mut(block)) {
        enhancer.process(inp, out, 1.0);
    }

    // Start-up starves the first two blocks whole; after that a block is
    // only short by the part of a hop the framer has not completed yet, and
    // only that tail is zero-filled.
    assert_eq!(stats.output_starvation.load(Ordering::Relaxed), 5);
    assert!(output[..2 * block].iter().all(|&v| v == 0.0));
    let short = &output[12 * block..13 * block];
    assert!(short[..block - 51].iter().all(|&v| v != 0.0));
    assert!(short[block - 51..].iter().all(|&v| v == 0.0));

    // 441 + 441 + 51 + 12 + 12 zero-filled samples in total
    let lag = 957;
    for t in 37 * block..input.len() {
        assert!((output[t] - input[t - lag]).abs() < 1e-4, "sample {}", t);
    }
}

#[test]
fn latency_trim_scenario() {
    let config = PipelineConfig::default();
    let queue = Arc::new(SampleQueue::new(config.queue_capacity).unwrap());
    let mut render = RenderPipeline::new(&config, Arc::clone(&queue), None).unwrap();

    assert!(render.capture_writer().push(&vec![0.25; 10_000]));
    let mut out = vec![0.0f32; 512];
    render.render(&mut out);

    assert_eq!(render.stats().trimmed_samples.load(Ordering::Relaxed), 7600);
    assert_eq!(queue.count(), 2400 - 512);

    // Within slack: nothing more is trimmed
    render.render(&mut out);
    assert_eq!(render.stats().trimmed_samples.load(Ordering::Relaxed), 7600);
}

#[test]
fn trailing_partial_block_rendered_after_padding() {
    let config = PipelineConfig::default();
    let queue = Arc::new(SampleQueue::new(config.queue_capacity).unwrap());
    let mut render = RenderPipeline::new(&config, Arc::clone(&queue), None).unwrap();

    let input = sine(2100, 440.0, 0.5);
    assert!(render.capture_writer().push(&input));

    let block_len = 512;
    let mut block = vec![0.0f32; block_len];
    let mut output = Vec::new();
    while queue.count() >= block_len {
        render.render(&mut block);
        output.extend_from_slice(&block);
    }
    let remaining = queue.count();
    assert_eq!(remaining, 2100 - 4 * block_len);

    assert!(queue.write(&vec![0.0; block_len - remaining]));
    render.render(&mut block);
    output.extend_from_slice(&block[..remaining]);

    assert_eq!(output.len(), input.len());
    assert_eq!(queue.count(), 0);
    assert_eq!(render.stats().queue_underruns.load(Ordering::Relaxed), 0);
    assert!(output[4 * block_len..].iter().any(|&v| v.abs() > 0.1));
}

#[test]
fn queue_is_fifo_across_threads() {
    let queue = Arc::new(SampleQueue::new(1024).unwrap());
    let total = 100_000usize;

    let producer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut next = 0usize;
            while next < total {
                let n = (37 + next % 91).min(total - next);
                let chunk: Vec<f32> = (next..next + n).map(|v| v as f32).collect();
                while !queue.write(&chunk) {
                    thread::yield_now();
                }
                next += n;
            }
        })
    };

    let mut expected = 0usize;
    let mut buf = vec![0.0f32; 64];
    while expected < total {
        let n = 64.min(total - expected);
        if queue.read(&mut buf[..n]) {
            for &v in &buf[..n] {
                assert_eq!(v, expected as f32);
                expected += 1;
            }
        } else {
            thread::yield_now();
        }
    }
    producer.join().unwrap();
    assert_eq!(queue.count(), 0);
}

#[cfg(feature = "onnx")]
#[test]
#[ignore = "requires a streaming model at METALVOICE_MODEL"]
fn onnx_engine_runs_on_noise() {
    use metalvoice_rt::OnnxEngine;
    use std::path::PathBuf;

    let model = std::env::var_os("METALVOICE_MODEL")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("models/dfn3_streaming.onnx"));
    let engine = OnnxEngine::new(&model).unwrap();

    let config = PipelineConfig {
        // Generous budget: debug builds on CI are slow
        inference_budget: std::time::Duration::from_millis(500),
        ..PipelineConfig::default()
    };
    let stats = Arc::new(PipelineStats::new());
    let mut enhancer =
        StreamingEnhancer::new(&config, Some(Box::new(engine)), Arc::clone(&stats)).unwrap();

    let input = noise(SAMPLE_RATE / 2, 3);
    let mut output = vec![0.0f32; input.len()];
    for (inp, out) in input.chunks(480).zip(output.chunks_mut(480)) {
        enhancer.process(inp, out, 1.0);
    }
    assert_eq!(stats.inference_failures.load(Ordering::Relaxed), 0);
    assert!(output.iter().all(|v| v.is_finite()));
}
