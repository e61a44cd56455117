//! Energy-based speech detector using per-frame RMS thresholding.
//!
//! ## Algorithm
//!
//! 1. Split the window into fixed-size frames (default 30 ms).
//! 2. Score each frame: RMS ≥ `threshold` → speech.
//! 3. Merge consecutive speech frames into segments.
//!
//! Much cruder than a real classifier, but dependency-free and fast, which
//! makes it the fallback detector and the test vehicle.

use super::{frames_to_segments, SpeechDetector, SpeechSegment};
use crate::error::Result;

/// Analysis frame length in samples (30 ms at 16 kHz).
const FRAME_SAMPLES: usize = 480;

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyDetector {
    /// RMS amplitude threshold. Frames above this are considered speech.
    /// Typical range: 0.01–0.05 for a quiet microphone.
    threshold: f32,
    frame_samples: usize,
}

impl EnergyDetector {
    /// Create a new `EnergyDetector` with the given RMS `threshold`.
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            frame_samples: FRAME_SAMPLES,
        }
    }

    /// Compute the root-mean-square of a sample slice.
    fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl SpeechDetector for EnergyDetector {
    fn detect(&mut self, window: &[f32]) -> Result<Vec<SpeechSegment>> {
        let frames: Vec<bool> = window
            .chunks_exact(self.frame_samples)
            .map(|frame| Self::rms(frame) >= self.threshold)
            .collect();

        Ok(frames_to_segments(&frames, self.frame_samples, window.len()))
    }

    fn reset(&mut self) {}
}
