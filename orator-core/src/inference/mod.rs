//! Transcription backend abstraction.
//!
//! The `Transcriber` trait decouples the engine from any specific speech
//! model. Model loading and warm-up are the backend's responsibility;
//! `warm_up` is invoked once before the stream starts.
//!
//! `&mut self` on `transcribe` intentionally expresses that decoders are
//! stateful — beam search caches, RNN hidden states, etc. All mutation is
//! therefore serialised through `TranscriberHandle`'s
//! `parking_lot::Mutex`.

pub mod stub;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::ipc::events::TranscriptSegment;
use crate::segment::Utterance;

/// Contract for speech recognition backends.
///
/// Invoked once per flushed utterance, always off the audio thread.
pub trait Transcriber: Send + 'static {
    /// One-time warm-up: load weights, pre-allocate caches, run a dummy
    /// inference. Called once at engine startup.
    ///
    /// # Errors
    /// Returns an error if model files are missing or corrupt.
    fn warm_up(&mut self) -> Result<()>;

    /// Transcribe one complete utterance.
    ///
    /// `language_hint` biases the model toward a language when set
    /// (e.g. `"en"`). Segment times are relative to the utterance start.
    ///
    /// # Returns
    /// An ordered list of segments. May be empty when the model hears
    /// nothing intelligible.
    fn transcribe(
        &mut self,
        utterance: &Utterance,
        language_hint: Option<&str>,
    ) -> Result<Vec<TranscriptSegment>>;

    /// Reset all internal decoder state (e.g. between utterances).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `Transcriber` implementor.
///
/// Uses `parking_lot::Mutex` for non-poisoning on panic and a faster
/// uncontended lock than `std::sync::Mutex`.
#[derive(Clone)]
pub struct TranscriberHandle(pub Arc<Mutex<dyn Transcriber>>);

impl TranscriberHandle {
    /// Wrap any `Transcriber` in a `TranscriberHandle`.
    pub fn new<T: Transcriber>(transcriber: T) -> Self {
        Self(Arc::new(Mutex::new(transcriber)))
    }
}

impl std::fmt::Debug for TranscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriberHandle").finish_non_exhaustive()
    }
}
