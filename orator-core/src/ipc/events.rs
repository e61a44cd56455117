//! Events broadcast by the engine.
//!
//! | Event | Emitted when |
//! |-------|--------------|
//! | `TranscriptEvent` | an utterance finished transcribing |
//! | `EngineStatusEvent` | the engine lifecycle state changes |
//! | `AudioActivityEvent` | each processed audio chunk (level metering) |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// Broadcast when the transcription worker finishes one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Utterance this transcript belongs to (stream-unique).
    pub utterance_id: u64,
    /// One or more transcript segments, in spoken order.
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptEvent {
    /// All segment texts joined with single spaces.
    pub fn joined_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A single recognised span of text within one utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Recognised text.
    pub text: String,
    /// Segment start relative to the utterance start, in seconds.
    pub start_secs: f32,
    /// Segment end relative to the utterance start, in seconds.
    pub end_secs: f32,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for each processed audio chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// Whether the assembler is currently inside an utterance.
    pub speaking: bool,
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Warming up the transcription backend.
    WarmingUp,
    /// Actively capturing audio and segmenting.
    Listening,
    /// Capture stopped; engine may be restarted.
    Stopped,
    /// Unrecoverable error — restart required.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_camel_case() {
        let event = TranscriptEvent {
            seq: 7,
            utterance_id: 2,
            segments: vec![TranscriptSegment {
                text: "hello".into(),
                start_secs: 0.0,
                end_secs: 1.25,
            }],
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["utteranceId"], 2);
        assert_eq!(json["segments"][0]["text"], "hello");
        let end = json["segments"][0]["endSecs"]
            .as_f64()
            .expect("endSecs should serialize as number");
        assert!((end - 1.25).abs() < 1e-6);

        let round_trip: TranscriptEvent =
            serde_json::from_value(json).expect("deserialize transcript event");
        assert_eq!(round_trip.seq, 7);
        assert_eq!(round_trip.segments.len(), 1);
    }

    #[test]
    fn joined_text_skips_empty_segments() {
        let event = TranscriptEvent {
            seq: 0,
            utterance_id: 0,
            segments: vec![
                TranscriptSegment {
                    text: "one".into(),
                    start_secs: 0.0,
                    end_secs: 0.5,
                },
                TranscriptSegment {
                    text: "  ".into(),
                    start_secs: 0.5,
                    end_secs: 0.6,
                },
                TranscriptSegment {
                    text: "two".into(),
                    start_secs: 0.6,
                    end_secs: 1.0,
                },
            ],
        };
        assert_eq!(event.joined_text(), "one two");
    }

    #[test]
    fn engine_status_event_serializes_with_lowercase_status() {
        let event = EngineStatusEvent {
            status: EngineStatus::WarmingUp,
            detail: Some("loading model".into()),
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "warmingup");
        assert_eq!(json["detail"], "loading model");

        let round_trip: EngineStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, EngineStatus::WarmingUp);
        assert_eq!(round_trip.detail.as_deref(), Some("loading model"));
    }

    #[test]
    fn audio_activity_event_serializes_with_camel_case_fields() {
        let event = AudioActivityEvent {
            seq: 3,
            rms: 0.18,
            speaking: true,
        };

        let json = serde_json::to_value(&event).expect("serialize activity event");
        assert_eq!(json["seq"], 3);
        assert_eq!(json["speaking"], true);

        let round_trip: AudioActivityEvent =
            serde_json::from_value(json).expect("deserialize activity event");
        assert!(round_trip.speaking);
    }
}
