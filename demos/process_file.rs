//! Demo: run a WAV file through the capture → render pipeline.
//!
//! A capture thread pushes the file in 10 ms blocks while the main thread plays
//! the render callback, the same split a live audio host would use.
//!
//! Usage: cargo run --example process_file [--features onnx] -- input.wav output.wav [model.onnx]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use metalvoice_rt::{
    InferenceEngine, PassthroughEngine, PipelineConfig, RenderPipeline, SampleQueue, SAMPLE_RATE,
};

const CAPTURE_BLOCK: usize = 480;
const RENDER_BLOCK: usize = 512;

fn load_engine(args: &[String]) -> Result<Box<dyn InferenceEngine>, Box<dyn std::error::Error>> {
    #[cfg(feature = "onnx")]
    if let Some(model) = args.get(3) {
        let engine = metalvoice_rt::OnnxEngine::new(std::path::Path::new(model))?;
        return Ok(Box::new(engine));
    }
    if args.len() > 3 {
        log::warn!("Built without the `onnx` feature, ignoring model argument");
    }
    Ok(Box::new(PassthroughEngine))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <input.wav> <output.wav> [model.onnx]", args[0]);
        std::process::exit(1);
    }

    let mut reader = hound::WavReader::open(&args[1])?;
    let spec = reader.spec();
    if spec.sample_rate != SAMPLE_RATE as u32 {
        log::warn!(
            "Input sample rate {} != {}. Resample first!",
            spec.sample_rate,
            SAMPLE_RATE
        );
    }

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };
    // First channel only
    let mono: Vec<f32> = samples
        .chunks(spec.channels as usize)
        .map(|frame| frame[0])
        .collect();
    log::info!(
        "Processing {} samples ({:.2}s)",
        mono.len(),
        mono.len() as f32 / SAMPLE_RATE as f32
    );

    let config = PipelineConfig::default();
    let queue = Arc::new(SampleQueue::new(config.queue_capacity)?);
    let mut render = RenderPipeline::new(&config, Arc::clone(&queue), Some(load_engine(&args)?))?;
    let capture = render.capture_writer();

    let capture_done = Arc::new(AtomicBool::new(false));
    let producer = {
        let done = Arc::clone(&capture_done);
        let queue = Arc::clone(&queue);
        let target = config.target_latency;
        thread::spawn(move || {
            for block in mono.chunks(CAPTURE_BLOCK) {
                // Offline the file is available at once; hold the backlog at
                // the latency target so nothing gets trimmed
                while queue.count() + block.len() > target {
                    thread::yield_now();
                }
                capture.push(block);
            }
            done.store(true, Ordering::Release);
        })
    };

    let start = std::time::Instant::now();
    let mut output = Vec::new();
    let mut block = vec![0.0f32; RENDER_BLOCK];
    loop {
        let finished = capture_done.load(Ordering::Acquire);
        if queue.count() >= RENDER_BLOCK {
            render.render(&mut block);
            output.extend_from_slice(&block);
        } else if finished {
            break;
        } else {
            thread::yield_now();
        }
    }
    producer.join().map_err(|_| "capture thread panicked")?;

    // Pad the last partial block with silence so the file's tail is rendered
    let remaining = queue.count();
    if remaining > 0 {
        let padding = vec![0.0f32; RENDER_BLOCK - remaining];
        if queue.write(&padding) {
            render.render(&mut block);
            output.extend_from_slice(&block[..remaining]);
        }
    }

    let elapsed = start.elapsed().as_secs_f32();
    let rtf = elapsed / (output.len().max(1) as f32 / SAMPLE_RATE as f32);
    log::info!("Done in {:.2}s (RTF: {:.3}x realtime)", elapsed, rtf);
    render.stats().log_summary();

    let out_spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args[2], out_spec)?;
    for &sample in &output {
        writer.write_sample((sample.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer.finalize()?;
    log::info!("Saved to {}", args[2]);
    Ok(())
}
