//! Offline utterance segmentation over a WAV file.
//!
//! Runs the same resample → VAD window → assembler path as the live
//! pipeline, but fed from disk, and prints the utterance spans it finds.
//! Useful for tuning silence/lookback parameters against recorded audio.

use orator_core::buffering::block::AudioBlock;
use orator_core::engine::EngineConfig;
use orator_core::vad::{EnergyDetector, SlidingVadWindow};
use orator_core::{audio::resample::Resampler, UtteranceAssembler};

use std::path::PathBuf;

/// Frames fed per iteration, mirroring a live callback block.
const BLOCK_FRAMES: usize = 512;

#[derive(Debug)]
struct Args {
    input: PathBuf,
    window_secs: f32,
    min_silence_secs: f32,
    lookback_secs: f32,
    threshold: f32,
    discard_tail: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut input: Option<PathBuf> = None;
    let mut window_secs = 0.3f32;
    let mut min_silence_secs = 1.0f32;
    let mut lookback_secs = 1.0f32;
    let mut threshold = 0.02f32;
    let mut discard_tail = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--window-secs" => window_secs = parse_value(&mut it, &arg)?,
            "--min-silence" => min_silence_secs = parse_value(&mut it, &arg)?,
            "--lookback" => lookback_secs = parse_value(&mut it, &arg)?,
            "--threshold" => threshold = parse_value(&mut it, &arg)?,
            "--discard-tail" => discard_tail = true,
            "--help" | "-h" => {
                return Err(
                    "usage: segment-wav <input.wav> [--window-secs F] [--min-silence F] \
                     [--lookback F] [--threshold F] [--discard-tail]"
                        .into(),
                )
            }
            other if input.is_none() && !other.starts_with('-') => {
                input = Some(PathBuf::from(other));
            }
            other => return Err(format!("unexpected argument: {other}")),
        }
    }

    Ok(Args {
        input: input.ok_or_else(|| "missing input WAV path".to_string())?,
        window_secs,
        min_silence_secs,
        lookback_secs,
        threshold,
        discard_tail,
    })
}

fn parse_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<f32, String> {
    let value = it.next().ok_or_else(|| format!("{flag} needs a value"))?;
    value
        .parse::<f32>()
        .map_err(|e| format!("{flag}: {e}"))
}

fn read_wav(path: &PathBuf) -> Result<(Vec<f32>, u16, u32), String> {
    let mut reader = hound::WavReader::open(path).map_err(|e| format!("open {path:?}: {e}"))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| format!("read samples: {e}"))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| format!("read samples: {e}"))?
        }
    };

    Ok((samples, spec.channels, spec.sample_rate))
}

fn run() -> Result<(), String> {
    let args = parse_args()?;
    let (samples, channels, source_rate) = read_wav(&args.input)?;

    let config = EngineConfig {
        vad_window_secs: args.window_secs,
        min_silence_secs: args.min_silence_secs,
        lookback_secs: args.lookback_secs,
        flush_on_stop: !args.discard_tail,
        ..EngineConfig::default()
    };
    config.validate().map_err(|e| e.to_string())?;

    let mut resampler =
        Resampler::new(source_rate, config.target_sample_rate).map_err(|e| e.to_string())?;
    let mut window = SlidingVadWindow::new(
        Box::new(EnergyDetector::new(args.threshold)),
        config.vad_window_samples(),
    )
    .map_err(|e| e.to_string())?;
    let mut assembler = UtteranceAssembler::new(&config);

    eprintln!(
        "{:?}: {} frames, {} ch @ {} Hz",
        args.input,
        samples.len() / channels.max(1) as usize,
        channels,
        source_rate
    );

    let mut count = 0usize;
    let mut report = |u: &orator_core::Utterance| {
        count += 1;
        println!(
            "utterance {:>3}  start={:8.3}s  duration={:7.3}s  samples={}",
            u.id,
            u.start_secs(),
            u.duration_secs(),
            u.samples.len()
        );
    };

    for chunk in samples.chunks(BLOCK_FRAMES * channels.max(1) as usize) {
        let block = AudioBlock::new(chunk.to_vec(), channels, source_rate);
        let resampled = resampler.process(&block).map_err(|e| e.to_string())?;
        if resampled.is_empty() {
            continue;
        }
        let verdict = window.evaluate(&resampled);
        if let Some(utterance) = assembler.push(&resampled, verdict.as_ref()) {
            report(&utterance);
        }
    }

    if let Some(utterance) = assembler.finish() {
        report(&utterance);
    }

    eprintln!("{count} utterance(s) found");
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("segment-wav failed: {e}");
        std::process::exit(1);
    }
}
