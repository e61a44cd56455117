//! WebRTC voice-activity detector backed by the `earshot` crate.
//!
//! `earshot` scores fixed 10/20/30 ms frames of 16-bit PCM at 16 kHz. The
//! adapter scans the analysis window in 30 ms frames, converts f32 samples
//! to i16 through a reused scratch buffer, and merges per-frame decisions
//! into segments.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};

use super::{frames_to_segments, SpeechDetector, SpeechSegment};
use crate::error::{OratorError, Result};

/// 30 ms at 16 kHz — the largest frame earshot accepts, fewest calls per window.
const FRAME_SAMPLES: usize = 480;

/// WebRTC-profile speech detector. Requires 16 kHz input.
pub struct EarshotDetector {
    detector: VoiceActivityDetector,
    scratch: Vec<i16>,
}

impl EarshotDetector {
    pub fn new(profile: VoiceActivityProfile) -> Self {
        Self {
            detector: VoiceActivityDetector::new(profile),
            scratch: Vec::with_capacity(FRAME_SAMPLES),
        }
    }
}

impl Default for EarshotDetector {
    fn default() -> Self {
        Self::new(VoiceActivityProfile::QUALITY)
    }
}

impl SpeechDetector for EarshotDetector {
    fn detect(&mut self, window: &[f32]) -> Result<Vec<SpeechSegment>> {
        let mut frames = Vec::with_capacity(window.len() / FRAME_SAMPLES + 1);

        for frame in window.chunks_exact(FRAME_SAMPLES) {
            self.scratch.clear();
            for &s in frame {
                self.scratch.push((s.clamp(-1.0, 1.0) * 32_767.0) as i16);
            }
            let speech = self
                .detector
                .predict_16khz(&self.scratch)
                .map_err(|_| OratorError::Classifier("webrtc vad rejected frame".into()))?;
            frames.push(speech);
        }

        Ok(frames_to_segments(&frames, FRAME_SAMPLES, window.len()))
    }

    fn reset(&mut self) {
        self.detector.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pure_silence_is_not_speech() {
        let mut vad = EarshotDetector::default();
        let segs = vad.detect(&vec![0.0f32; FRAME_SAMPLES * 10]).unwrap();
        assert!(segs.is_empty());
    }

    #[test]
    fn short_window_yields_no_frames() {
        // Less than one 30 ms frame — nothing to score.
        let mut vad = EarshotDetector::default();
        let segs = vad.detect(&vec![0.3f32; FRAME_SAMPLES - 1]).unwrap();
        assert!(segs.is_empty());
    }

    #[test]
    fn reset_is_usable_again() {
        let mut vad = EarshotDetector::default();
        let _ = vad.detect(&vec![0.0f32; FRAME_SAMPLES]).unwrap();
        vad.reset();
        let segs = vad.detect(&vec![0.0f32; FRAME_SAMPLES]).unwrap();
        assert!(segs.is_empty());
    }
}
