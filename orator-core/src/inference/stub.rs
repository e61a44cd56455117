//! `StubTranscriber` — placeholder backend that echoes metadata without
//! real inference.
//!
//! Lets the full capture → segmentation → publication path be exercised
//! end-to-end before a real model backend is wired in.

use tracing::debug;

use crate::error::Result;
use crate::inference::Transcriber;
use crate::ipc::events::TranscriptSegment;
use crate::segment::Utterance;

/// Echo-style stub backend.
///
/// For every utterance of non-trivial length it emits a single segment
/// `"[utterance <id>: <N> samples @ <SR> Hz]"` spanning the whole buffer.
pub struct StubTranscriber;

impl StubTranscriber {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for StubTranscriber {
    fn warm_up(&mut self) -> Result<()> {
        debug!("StubTranscriber::warm_up — no-op");
        Ok(())
    }

    fn transcribe(
        &mut self,
        utterance: &Utterance,
        language_hint: Option<&str>,
    ) -> Result<Vec<TranscriptSegment>> {
        if utterance.samples.len() < 160 {
            return Ok(vec![]);
        }

        let mut text = format!(
            "[utterance {}: {} samples @ {} Hz]",
            utterance.id,
            utterance.samples.len(),
            utterance.sample_rate
        );
        if let Some(lang) = language_hint {
            text.push_str(&format!(" ({lang})"));
        }

        Ok(vec![TranscriptSegment {
            text,
            start_secs: 0.0,
            end_secs: utterance.duration_secs() as f32,
        }])
    }

    fn reset(&mut self) {
        debug!("StubTranscriber::reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utterance(len: usize) -> Utterance {
        Utterance {
            id: 3,
            samples: vec![0.1; len],
            sample_rate: 16_000,
            first_sample: 0,
        }
    }

    #[test]
    fn trivial_utterance_is_skipped() {
        let mut stub = StubTranscriber::new();
        assert!(stub.transcribe(&utterance(100), None).unwrap().is_empty());
    }

    #[test]
    fn segment_spans_whole_utterance() {
        let mut stub = StubTranscriber::new();
        let segs = stub.transcribe(&utterance(16_000), Some("en")).unwrap();
        assert_eq!(segs.len(), 1);
        assert!(segs[0].text.contains("16000 samples"));
        assert!(segs[0].text.ends_with("(en)"));
        assert!((segs[0].end_secs - 1.0).abs() < 1e-6);
    }
}
