//! Voice Activity Detection (VAD) abstraction.
//!
//! The `SpeechDetector` trait is the primary extensibility point: swap in
//! `EnergyDetector` (dependency-free fallback), `EarshotDetector` (WebRTC
//! VAD, default), or any future neural detector without touching the
//! pipeline. The detector handle is passed explicitly into
//! [`SlidingVadWindow`](window::SlidingVadWindow) at construction — there is
//! no process-wide model state.

pub mod energy;
pub mod window;

#[cfg(feature = "vad-earshot")]
pub mod webrtc;

#[cfg(feature = "vad-earshot")]
pub use webrtc::EarshotDetector;

pub use energy::EnergyDetector;
pub use window::SlidingVadWindow;

use crate::error::Result;

/// One span of detected speech, in sample offsets relative to the analysed
/// window (`start` inclusive, `end` exclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    pub start: usize,
    pub end: usize,
}

/// One span of detected speech in absolute stream coordinates (0-based
/// sample indices, monotonically increasing for the stream's lifetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSpan {
    pub start: u64,
    pub end: u64,
}

/// Result of one sliding-window evaluation, translated into absolute
/// stream coordinates. An empty segment list means "no speech detected".
#[derive(Debug, Clone, Default)]
pub struct VadVerdict {
    pub segments: Vec<SpeechSpan>,
}

impl VadVerdict {
    pub fn is_speech(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Absolute index of the last detected speech sample, if any.
    pub fn latest_speech_end(&self) -> Option<u64> {
        self.segments.last().map(|s| s.end)
    }
}

/// Trait for all voice-activity classifier implementations.
///
/// Implementors may be stateful (hangover counters, RNN hidden states,
/// etc.). `detect` is always fed exactly the configured window length.
pub trait SpeechDetector: Send + 'static {
    /// Analyse a full window of mono samples at the pipeline's target rate
    /// and return the speech segments found, window-relative, in order.
    ///
    /// # Errors
    /// Classifier faults surface as `OratorError::Classifier`; the window
    /// treats them as an empty verdict (fail toward silence).
    fn detect(&mut self, window: &[f32]) -> Result<Vec<SpeechSegment>>;

    /// Reset any internal state (e.g. hangover counters, hidden states).
    fn reset(&mut self);
}

/// Merge consecutive speech frames into window-relative segments.
///
/// `frames` holds one bool per fixed-size analysis frame; the final partial
/// frame of a window, if any, is not scored and simply ends the last
/// segment at the window edge when preceded by speech.
pub(crate) fn frames_to_segments(
    frames: &[bool],
    frame_samples: usize,
    window_len: usize,
) -> Vec<SpeechSegment> {
    let mut segments = Vec::new();
    let mut open: Option<usize> = None;

    for (i, &speech) in frames.iter().enumerate() {
        match (speech, open) {
            (true, None) => open = Some(i * frame_samples),
            (false, Some(start)) => {
                segments.push(SpeechSegment {
                    start,
                    end: i * frame_samples,
                });
                open = None;
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        segments.push(SpeechSegment {
            start,
            end: window_len.min(frames.len() * frame_samples).max(start),
        });
    }

    segments
}
