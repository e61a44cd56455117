//! # orator-core
//!
//! Live utterance segmentation engine SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Pipeline(spawn_blocking)
//!                                                    │
//!                                     Resampler → SlidingVadWindow
//!                                                    │
//!                                           UtteranceAssembler
//!                                                    │
//!                                     bounded utterance queue
//!                                                    │
//!                         transcription worker → broadcast::Sender<TranscriptEvent>
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the pipeline
//! thread; transcription runs on its own consumer thread behind the queue.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod inference;
pub mod ipc;
pub mod segment;
pub mod vad;

// Convenience re-exports for downstream crates
pub use engine::{EngineConfig, OratorEngine};
pub use error::OratorError;
pub use inference::{Transcriber, TranscriberHandle};
pub use ipc::events::{
    AudioActivityEvent, EngineStatus, EngineStatusEvent, TranscriptEvent, TranscriptSegment,
};
pub use segment::{Utterance, UtteranceAssembler};
pub use vad::{SlidingVadWindow, SpeechDetector, VadVerdict};

#[cfg(feature = "vad-earshot")]
pub use vad::EarshotDetector;
