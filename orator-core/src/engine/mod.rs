//! `OratorEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! OratorEngine::new()
//!     └─► warm_up()          → backend loaded, status = WarmingUp → Idle
//!         └─► start(vad)     → audio open, pipeline spawned, status = Listening
//!             └─► stop()     → running=false, stream dropped, status = Stopped
//! ```
//!
//! `stop()` is idempotent and waits for the pipeline thread to confirm
//! teardown, so the device callback cannot fire again after it returns.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A sync
//! channel propagates any open-device errors back to the `start()` caller.

pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::AudioCapture,
    buffering::create_audio_ring,
    error::{OratorError, Result},
    inference::TranscriberHandle,
    ipc::events::{AudioActivityEvent, EngineStatus, EngineStatusEvent, TranscriptEvent},
    segment::Utterance,
    vad::{SlidingVadWindow, SpeechDetector},
};

/// Broadcast channel capacity: events buffered for slow subscribers.
const BROADCAST_CAP: usize = 256;

/// How long `stop()` waits for the pipeline thread to confirm teardown.
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Validated engine configuration.
///
/// One struct, one construction-time validation pass — `validate()` fails
/// fast with `OratorError::Config` instead of deferring bad values into
/// the running pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target sample rate for segmentation and inference (Hz).
    /// Audio captured at other rates is resampled. Default: 16000.
    pub target_sample_rate: u32,
    /// Sliding VAD window length in seconds. Classifiers need a window
    /// this long to be statistically meaningful. Default: 0.3.
    pub vad_window_secs: f32,
    /// Renewed silence required to close an utterance, in seconds.
    /// Compared in samples, so callback jitter cannot affect it.
    /// Default: 1.0.
    pub min_silence_secs: f32,
    /// Pre-roll retained before confirmed speech onset, in seconds.
    /// Default: 1.0.
    pub lookback_secs: f32,
    /// Maximum accumulated utterance length before a forced flush, in
    /// seconds. Bounds memory under continuous speech. Default: 30.0.
    pub max_utterance_secs: f32,
    /// Whether a partial utterance is flushed (`true`) or discarded
    /// (`false`) when the stream stops mid-speech. Default: false.
    pub flush_on_stop: bool,
    /// Completed-utterance queue capacity. The pipeline blocks (bounded
    /// backpressure) when the consumer lags. Default: 32.
    pub queue_capacity: usize,
    /// Language bias passed to the transcription backend (e.g. "en").
    pub language_hint: Option<String>,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            vad_window_secs: 0.3,
            min_silence_secs: 1.0,
            lookback_secs: 1.0,
            max_utterance_secs: 30.0,
            flush_on_stop: false,
            queue_capacity: 32,
            language_hint: None,
            preferred_device: None,
        }
    }
}

impl EngineConfig {
    /// Validate all fields. Called once at engine construction.
    pub fn validate(&self) -> Result<()> {
        if self.target_sample_rate == 0 {
            return Err(OratorError::Config("target_sample_rate must be > 0".into()));
        }
        if !(self.vad_window_secs > 0.0) {
            return Err(OratorError::Config("vad_window_secs must be > 0".into()));
        }
        if !(self.min_silence_secs > 0.0) {
            return Err(OratorError::Config("min_silence_secs must be > 0".into()));
        }
        if !(self.lookback_secs >= 0.0) {
            return Err(OratorError::Config("lookback_secs must be >= 0".into()));
        }
        if !(self.max_utterance_secs >= self.vad_window_secs) {
            return Err(OratorError::Config(
                "max_utterance_secs must be >= vad_window_secs".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(OratorError::Config("queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    pub fn vad_window_samples(&self) -> usize {
        (self.vad_window_secs as f64 * self.target_sample_rate as f64).round() as usize
    }

    pub fn min_silence_samples(&self) -> u64 {
        (self.min_silence_secs as f64 * self.target_sample_rate as f64).round() as u64
    }

    pub fn lookback_samples(&self) -> usize {
        (self.lookback_secs as f64 * self.target_sample_rate as f64).round() as usize
    }

    pub fn max_utterance_samples(&self) -> usize {
        (self.max_utterance_secs as f64 * self.target_sample_rate as f64).round() as usize
    }
}

/// The top-level engine handle.
///
/// `OratorEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<OratorEngine>` to share between the embedding binary and
/// event-forwarding tasks.
pub struct OratorEngine {
    config: EngineConfig,
    transcriber: Option<TranscriberHandle>,
    /// `true` while capture + pipeline are active.
    running: Arc<AtomicBool>,
    /// Canonical status (written atomically via Mutex, read from callers).
    status: Arc<Mutex<EngineStatus>>,
    /// Broadcast sender for transcript events.
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    /// Broadcast sender for status events.
    status_tx: broadcast::Sender<EngineStatusEvent>,
    /// Broadcast sender for live level/VAD activity events.
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    /// Monotonically increasing event sequence counter.
    seq: Arc<AtomicU64>,
    /// Consumer half of the utterance queue, present only when no
    /// transcription worker owns it (polling mode).
    utterance_rx: Mutex<Option<crossbeam_channel::Receiver<Utterance>>>,
    /// Teardown confirmation for the current run, consumed by `stop()`.
    done_rx: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    /// Shared pipeline diagnostics counters.
    diagnostics: Arc<pipeline::PipelineDiagnostics>,
}

impl OratorEngine {
    /// Create a new engine. Does not start capturing — call `warm_up()`
    /// (when a transcriber is attached) then `start()`.
    ///
    /// With `transcriber = None` the engine runs in polling mode: the
    /// caller drains completed utterances via [`poll_utterance`].
    ///
    /// # Errors
    /// `OratorError::Config` when the configuration is invalid.
    ///
    /// [`poll_utterance`]: OratorEngine::poll_utterance
    pub fn new(config: EngineConfig, transcriber: Option<TranscriberHandle>) -> Result<Self> {
        config.validate()?;

        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);

        Ok(Self {
            config,
            transcriber,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(EngineStatus::Idle)),
            transcript_tx,
            status_tx,
            activity_tx,
            seq: Arc::new(AtomicU64::new(0)),
            utterance_rx: Mutex::new(None),
            done_rx: Mutex::new(None),
            diagnostics: Arc::new(pipeline::PipelineDiagnostics::default()),
        })
    }

    /// Warm up the transcription backend (load weights, dummy inference).
    ///
    /// Call once at application startup, before `start()`. A no-op when no
    /// transcriber is attached.
    pub fn warm_up(&self) -> Result<()> {
        let Some(ref transcriber) = self.transcriber else {
            return Ok(());
        };
        self.set_status(EngineStatus::WarmingUp, None);
        info!("warming up transcription backend");
        transcriber.0.lock().warm_up()?;
        self.set_status(EngineStatus::Idle, None);
        info!("transcription backend ready");
        Ok(())
    }

    /// Start audio capture and the pipeline, using `detector` as the
    /// voice-activity classifier for this run. The handle is owned by the
    /// pipeline for the lifetime of the run; pass a fresh one on restart.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The pipeline continues in a background blocking thread.
    ///
    /// # Errors
    /// - `OratorError::AlreadyRunning` if already started.
    /// - `OratorError::Config` for a zero-length VAD window.
    /// - `OratorError::NoDefaultInputDevice` / `OratorError::AudioStream`
    ///   on device errors.
    pub fn start(&self, detector: Box<dyn SpeechDetector>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OratorError::AlreadyRunning);
        }

        let window = match SlidingVadWindow::new(detector, self.config.vad_window_samples()) {
            Ok(w) => w,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        self.diagnostics.reset();
        self.set_status(EngineStatus::Listening, None);

        let (producer, consumer) = create_audio_ring();
        let (utterance_tx, utterance_rx) =
            crossbeam_channel::bounded::<Utterance>(self.config.queue_capacity);

        // Clone all Arc-wrapped state before moving into the closure.
        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let activity_tx = self.activity_tx.clone();
        let diagnostics = Arc::clone(&self.diagnostics);
        let preferred_device = self.config.preferred_device.clone();

        // Sync channels: device-open confirmation and teardown signal.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        *self.done_rx.lock() = Some(done_rx);

        tokio::task::spawn_blocking(move || {
            // ── Open audio device (must happen on THIS thread — cpal::Stream is !Send) ──
            let capture = match AudioCapture::open(
                producer,
                Arc::clone(&running),
                preferred_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    let _ = done_tx.send(());
                    return;
                }
            };

            pipeline::run(pipeline::PipelineContext {
                config,
                window,
                consumer,
                running,
                utterance_tx,
                activity_tx,
                capture_sample_rate: capture.sample_rate,
                capture_channels: capture.channels,
                diagnostics,
            });

            // Stream drops here, releasing the audio device on this thread.
            // After this point the callback can no longer fire.
            drop(capture);
            let _ = done_tx.send(());
        });

        // Hand the queue to the transcription worker, or keep it for polling.
        match self.transcriber.clone() {
            Some(handle) => {
                let transcript_tx = self.transcript_tx.clone();
                let seq = Arc::clone(&self.seq);
                let language_hint = self.config.language_hint.clone();
                let _worker = std::thread::Builder::new()
                    .name("orator-transcribe".into())
                    .spawn(move || {
                        transcription_worker(handle, utterance_rx, transcript_tx, seq, language_hint)
                    })
                    .map_err(|e| OratorError::Other(anyhow::anyhow!("spawn worker: {e}")))?;
            }
            None => {
                *self.utterance_rx.lock() = Some(utterance_rx);
            }
        }

        // Block start() until device open is confirmed.
        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "engine started — listening");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Channel closed before a message was sent — spawn_blocking panicked?
                self.running.store(false, Ordering::SeqCst);
                self.set_status(EngineStatus::Error, Some("pipeline failed to start".into()));
                Err(OratorError::Other(anyhow::anyhow!(
                    "pipeline task died unexpectedly"
                )))
            }
        }
    }

    /// Stop audio capture and the pipeline.
    ///
    /// Idempotent — calling it while stopped is a no-op. On an active
    /// engine this waits (bounded) for the pipeline thread to drop the
    /// capture stream, so the device callback is guaranteed not to be
    /// invoked again after `stop()` returns.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("stop requested but engine is not running");
            return Ok(());
        }

        info!("engine stop requested");
        if let Some(done_rx) = self.done_rx.lock().take() {
            match done_rx.recv_timeout(STOP_JOIN_TIMEOUT) {
                Ok(()) => info!("pipeline torn down"),
                Err(_) => warn!("timed out waiting for pipeline teardown"),
            }
        }
        self.set_status(EngineStatus::Stopped, None);
        Ok(())
    }

    /// Drain one completed utterance (polling mode only).
    ///
    /// Returns `None` when the queue is empty, not yet started, or owned
    /// by the transcription worker.
    pub fn poll_utterance(&self) -> Option<Utterance> {
        self.utterance_rx
            .lock()
            .as_ref()
            .and_then(|rx| rx.try_recv().ok())
    }

    /// Current engine status (snapshot).
    pub fn status(&self) -> EngineStatus {
        *self.status.lock()
    }

    /// Subscribe to live transcript events.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<EngineStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to live voice activity events (RMS + speaking flag).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> pipeline::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: EngineStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(EngineStatusEvent {
            status: new_status,
            detail,
        });
    }
}

/// Consumer loop: drain the utterance queue and run transcription off the
/// audio path. Transcription failures are reported per utterance and never
/// touch the running pipeline.
fn transcription_worker(
    handle: TranscriberHandle,
    utterance_rx: crossbeam_channel::Receiver<Utterance>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    seq: Arc<AtomicU64>,
    language_hint: Option<String>,
) {
    info!("transcription worker started");
    loop {
        match utterance_rx.recv_timeout(Duration::from_millis(200)) {
            Ok(utterance) => {
                let result = handle
                    .0
                    .lock()
                    .transcribe(&utterance, language_hint.as_deref());
                match result {
                    Ok(segments) if segments.is_empty() => {
                        info!(
                            utterance_id = utterance.id,
                            samples = utterance.samples.len(),
                            "transcription returned no segments"
                        );
                    }
                    Ok(segments) => {
                        let event = TranscriptEvent {
                            seq: seq.fetch_add(1, Ordering::Relaxed),
                            utterance_id: utterance.id,
                            segments,
                        };
                        let delivered = transcript_tx.send(event).is_ok();
                        debug!(
                            utterance_id = utterance.id,
                            delivered, "transcript broadcast"
                        );
                    }
                    Err(e) => {
                        error!(utterance_id = utterance.id, "transcription failed: {e}");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("transcription worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let mut cfg = EngineConfig::default();
        cfg.target_sample_rate = 0;
        assert!(matches!(cfg.validate(), Err(OratorError::Config(_))));

        let mut cfg = EngineConfig::default();
        cfg.vad_window_secs = 0.0;
        assert!(matches!(cfg.validate(), Err(OratorError::Config(_))));

        let mut cfg = EngineConfig::default();
        cfg.min_silence_secs = -1.0;
        assert!(matches!(cfg.validate(), Err(OratorError::Config(_))));

        let mut cfg = EngineConfig::default();
        cfg.queue_capacity = 0;
        assert!(matches!(cfg.validate(), Err(OratorError::Config(_))));

        let mut cfg = EngineConfig::default();
        cfg.max_utterance_secs = 0.1;
        assert!(matches!(cfg.validate(), Err(OratorError::Config(_))));
    }

    #[test]
    fn derived_sample_counts() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.vad_window_samples(), 4_800);
        assert_eq!(cfg.min_silence_samples(), 16_000);
        assert_eq!(cfg.lookback_samples(), 16_000);
        assert_eq!(cfg.max_utterance_samples(), 480_000);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut cfg = EngineConfig::default();
        cfg.queue_capacity = 0;
        assert!(matches!(
            OratorEngine::new(cfg, None),
            Err(OratorError::Config(_))
        ));
    }

    #[test]
    fn stop_before_start_is_a_noop() {
        let engine = OratorEngine::new(EngineConfig::default(), None).unwrap();
        assert!(engine.stop().is_ok());
        assert!(engine.stop().is_ok());
        assert_eq!(engine.status(), EngineStatus::Idle);
    }

    #[test]
    fn poll_before_start_returns_none() {
        let engine = OratorEngine::new(EngineConfig::default(), None).unwrap();
        assert!(engine.poll_utterance().is_none());
    }
}
