//! Sample-rate normalisation for heterogeneous device input.
//!
//! ## Design
//!
//! Devices capture at their native rate (commonly 44.1 or 48 kHz) and may
//! deliver interleaved multi-channel frames; the VAD and downstream model
//! want 16 kHz mono f32. `Resampler` bridges that gap on the non-RT
//! pipeline thread, where allocation is allowed:
//!
//! 1. interleaved input is downmixed to mono by channel average,
//! 2. integer-PCM-scaled floats (peak > 1.0) are divided by 32768 — some
//!    backends deliver pre-normalised floats, others raw integer-derived
//!    ones,
//! 3. the mono signal is rate-converted through a rubato `FastFixedIn`
//!    session, or passed through untouched when rates already match.
//!
//! A block arriving with a different source rate (device reconnect)
//! invalidates the rubato session and rebuilds it for the new rate.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as _};
use tracing::{error, info};

use crate::buffering::block::AudioBlock;
use crate::error::{OratorError, Result};

/// Input frame count per rubato call. Partial chunks are accumulated
/// between calls, so callers may feed blocks of any size.
const RESAMPLE_CHUNK: usize = 960;

/// Converts interleaved f32 device blocks to mono audio at a fixed target rate.
pub struct Resampler {
    source_rate: u32,
    target_rate: u32,
    /// `None` when source rate == target rate (passthrough mode).
    inner: Option<FastFixedIn<f32>>,
    /// Accumulation buffer — holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// Mono scratch reused across calls.
    mono_buf: Vec<f32>,
    /// Pre-allocated rubato output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a new resampler.
    ///
    /// # Errors
    /// Returns `OratorError::Config` when either rate is zero, or
    /// `OratorError::AudioStream` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        if source_rate == 0 {
            return Err(OratorError::Config("source sample rate must be > 0".into()));
        }
        if target_rate == 0 {
            return Err(OratorError::Config("target sample rate must be > 0".into()));
        }

        let inner = Self::build_inner(source_rate, target_rate)?;
        Ok(Self {
            source_rate,
            target_rate,
            inner,
            input_buf: Vec::new(),
            mono_buf: Vec::new(),
            output_buf: vec![vec![0f32; 0]; 1],
        })
    }

    fn build_inner(source_rate: u32, target_rate: u32) -> Result<Option<FastFixedIn<f32>>> {
        if source_rate == target_rate {
            return Ok(None);
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let inner = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio — no dynamic adjustment
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            1, // mono
        )
        .map_err(|e| OratorError::AudioStream(format!("resampler init: {e}")))?;

        info!(source_rate, target_rate, "resampling enabled");
        Ok(Some(inner))
    }

    /// Process one device block, returning mono samples at the target rate
    /// (may be empty while a partial rubato chunk accumulates).
    ///
    /// Callers must feed a continuous, gap-free sequence of blocks for one
    /// logical stream; the only state carried across calls is the filter
    /// continuity and the partial-chunk accumulator.
    pub fn process(&mut self, block: &AudioBlock) -> Result<Vec<f32>> {
        if block.channels == 0 {
            return Err(OratorError::AudioStream("block with zero channels".into()));
        }

        if block.sample_rate != self.source_rate {
            // Device reconnect — rebuild the filter for the new rate.
            info!(
                old_rate = self.source_rate,
                new_rate = block.sample_rate,
                "source rate changed — rebuilding resampler"
            );
            self.inner = Self::build_inner(block.sample_rate, self.target_rate)?;
            self.source_rate = block.sample_rate;
            self.input_buf.clear();
        }

        self.downmix(block);
        normalize_pcm_scale(&mut self.mono_buf);

        let Some(ref mut inner) = self.inner else {
            // Zero-copy-equivalent passthrough at equal rates.
            return Ok(std::mem::take(&mut self.mono_buf));
        };

        let max_out = inner.output_frames_max();
        if self.output_buf[0].len() < max_out {
            self.output_buf[0].resize(max_out, 0.0);
        }

        self.input_buf.append(&mut self.mono_buf);

        let mut result = Vec::new();
        while self.input_buf.len() >= RESAMPLE_CHUNK {
            let input_slice = &self.input_buf[..RESAMPLE_CHUNK];

            match inner.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..RESAMPLE_CHUNK);
        }

        Ok(result)
    }

    /// Returns `true` when source rate == target rate (no rate conversion).
    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    /// Source rate the filter is currently built for.
    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Channel-average the block into `mono_buf`.
    fn downmix(&mut self, block: &AudioBlock) {
        let ch = block.channels as usize;
        self.mono_buf.clear();
        if ch == 1 {
            self.mono_buf.extend_from_slice(&block.samples);
            return;
        }
        self.mono_buf.reserve(block.frames());
        for frame in block.samples.chunks_exact(ch) {
            let sum: f32 = frame.iter().sum();
            self.mono_buf.push(sum / ch as f32);
        }
    }
}

/// Divide by 32768 when the peak magnitude betrays integer-PCM scaling.
fn normalize_pcm_scale(samples: &mut [f32]) {
    let peak = samples.iter().fold(0f32, |acc, s| acc.max(s.abs()));
    if peak > 1.0 {
        for s in samples.iter_mut() {
            *s /= 32_768.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mono_block(samples: Vec<f32>, rate: u32) -> AudioBlock {
        AudioBlock::mono(samples, rate)
    }

    #[test]
    fn passthrough_identity() {
        let mut rc = Resampler::new(16_000, 16_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = rc.process(&mono_block(samples.clone(), 16_000)).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn rejects_zero_rates() {
        assert!(matches!(
            Resampler::new(0, 16_000),
            Err(OratorError::Config(_))
        ));
        assert!(matches!(
            Resampler::new(48_000, 0),
            Err(OratorError::Config(_))
        ));
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = Resampler::new(48_000, 16_000).unwrap();
        assert!(!rc.is_passthrough());
        // One full rubato chunk at 48 kHz → ~320 samples at 16 kHz
        let out = rc.process(&mono_block(vec![0.0f32; 960], 48_000)).unwrap();
        assert!(!out.is_empty(), "expected non-empty output");
        let expected = 320isize;
        assert!(
            (out.len() as isize - expected).unsigned_abs() <= 8,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn cumulative_length_tracks_ratio() {
        for source in [8_000u32, 22_050, 44_100, 48_000] {
            let mut rc = Resampler::new(source, 16_000).unwrap();
            let mut produced = 0usize;
            let total_in = 960 * 50;
            for _ in 0..50 {
                produced += rc
                    .process(&mono_block(vec![0.0f32; 960], source))
                    .unwrap()
                    .len();
            }
            let expected = (total_in as f64 * 16_000.0 / source as f64).round() as isize;
            // One chunk of input may still sit in the accumulator.
            let slack = (RESAMPLE_CHUNK as f64 * 16_000.0 / source as f64).ceil() as isize + 8;
            assert!(
                (produced as isize - expected).abs() <= slack,
                "source={source}: produced={produced} expected≈{expected}"
            );
        }
    }

    #[test]
    fn partial_accumulation_returns_empty() {
        let mut rc = Resampler::new(48_000, 16_000).unwrap();
        let out = rc.process(&mono_block(vec![0.0f32; 500], 48_000)).unwrap();
        assert!(
            out.is_empty(),
            "expected empty output for partial chunk, got {}",
            out.len()
        );
    }

    #[test]
    fn multiple_partial_chunks_accumulate() {
        let mut rc = Resampler::new(48_000, 16_000).unwrap();
        let out1 = rc.process(&mono_block(vec![0.0f32; 500], 48_000)).unwrap();
        assert!(out1.is_empty());
        let out2 = rc.process(&mono_block(vec![0.0f32; 500], 48_000)).unwrap();
        assert!(!out2.is_empty(), "second push should trigger processing");
    }

    #[test]
    fn stereo_downmix_is_channel_average() {
        let mut rc = Resampler::new(16_000, 16_000).unwrap();
        let interleaved = vec![0.5f32, -0.5, 0.25, 0.75, -1.0, 1.0];
        let out = rc
            .process(&AudioBlock::new(interleaved, 2, 16_000))
            .unwrap();
        assert_eq!(out, vec![0.0, 0.5, 0.0]);
    }

    #[test]
    fn integer_scaled_input_is_normalised() {
        let mut rc = Resampler::new(16_000, 16_000).unwrap();
        let out = rc
            .process(&mono_block(vec![16_384.0f32, -32_768.0], 16_000))
            .unwrap();
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn in_range_floats_are_untouched() {
        let mut rc = Resampler::new(16_000, 16_000).unwrap();
        let out = rc.process(&mono_block(vec![0.9f32, -1.0], 16_000)).unwrap();
        assert_eq!(out, vec![0.9, -1.0]);
    }

    #[test]
    fn rate_change_rebuilds_filter() {
        let mut rc = Resampler::new(48_000, 16_000).unwrap();
        let _ = rc.process(&mono_block(vec![0.0f32; 960], 48_000)).unwrap();
        // Device reconnected at 16 kHz — passthrough from here on.
        let samples: Vec<f32> = (0..256).map(|i| i as f32 * 0.002).collect();
        let out = rc.process(&mono_block(samples.clone(), 16_000)).unwrap();
        assert!(rc.is_passthrough());
        assert_eq!(rc.source_rate(), 16_000);
        assert_eq!(out, samples);
    }
}
