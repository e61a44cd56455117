//! Sliding analysis window decoupling the classifier from the callback
//! block size.
//!
//! Classifiers need a statistically meaningful stretch of audio (e.g.
//! 300 ms) while the capture callback delivers much smaller blocks (e.g.
//! 512 samples ≈ 32 ms at 16 kHz). `SlidingVadWindow` accumulates resampled
//! samples into a fixed-capacity ring and, once the ring has filled once,
//! re-evaluates the classifier on every push.
//!
//! Segment offsets come back window-relative; the window translates them to
//! absolute stream coordinates as
//! `total_samples_seen - window_len + offset`, so downstream consumers can
//! compare speech positions against the running sample clock.

use std::collections::VecDeque;

use tracing::warn;

use super::{SpeechDetector, SpeechSpan, VadVerdict};
use crate::error::{OratorError, Result};

/// Fixed-capacity sliding window over the resampled stream, owning the
/// classifier handle.
pub struct SlidingVadWindow {
    detector: Box<dyn SpeechDetector>,
    window: VecDeque<f32>,
    capacity: usize,
    /// Set once the ring has reached capacity for the first time; before
    /// that, evaluations are suppressed.
    filled: bool,
    total_samples_seen: u64,
    /// Contiguous copy of the ring handed to the detector.
    scratch: Vec<f32>,
}

impl SlidingVadWindow {
    /// Create a window of `capacity` samples around the given detector.
    ///
    /// # Errors
    /// Returns `OratorError::Config` for a zero-capacity window.
    pub fn new(detector: Box<dyn SpeechDetector>, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(OratorError::Config(
                "VAD window capacity must be > 0".into(),
            ));
        }
        Ok(Self {
            detector,
            window: VecDeque::with_capacity(capacity),
            capacity,
            filled: false,
            total_samples_seen: 0,
            scratch: Vec::with_capacity(capacity),
        })
    }

    /// Append `chunk` to the ring and evaluate the classifier.
    ///
    /// Returns `None` during the initial partial-fill period, then `Some`
    /// on every subsequent call — an empty verdict means "no speech". A
    /// classifier failure is logged and reported as an empty verdict (fail
    /// toward silence, never toward false speech).
    pub fn evaluate(&mut self, chunk: &[f32]) -> Option<VadVerdict> {
        for &s in chunk {
            if self.window.len() == self.capacity {
                self.window.pop_front();
            }
            self.window.push_back(s);
        }
        self.total_samples_seen += chunk.len() as u64;

        if !self.filled {
            if self.window.len() < self.capacity {
                return None;
            }
            self.filled = true;
        }

        self.scratch.clear();
        self.scratch.extend(self.window.iter().copied());

        let segments = match self.detector.detect(&self.scratch) {
            Ok(segments) => segments,
            Err(e) => {
                warn!("classifier failure, treating window as silence: {e}");
                return Some(VadVerdict::default());
            }
        };

        // Window-relative → absolute stream coordinates.
        let base = self.total_samples_seen - self.capacity as u64;
        let segments = segments
            .into_iter()
            .map(|s| SpeechSpan {
                start: base + s.start as u64,
                end: base + s.end as u64,
            })
            .collect();

        Some(VadVerdict { segments })
    }

    /// Total samples pushed through this window since stream start.
    pub fn total_samples_seen(&self) -> u64 {
        self.total_samples_seen
    }

    /// Clear all buffered audio and classifier state (explicit stream
    /// restart — the sample clock starts over).
    pub fn reset(&mut self) {
        self.window.clear();
        self.filled = false;
        self.total_samples_seen = 0;
        self.detector.reset();
    }
}
