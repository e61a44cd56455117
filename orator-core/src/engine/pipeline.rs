//! Blocking pipeline loop.
//!
//! ## Pipeline stages (per iteration)
//!
//! ```text
//! 1. Drain ring buffer → frame-aligned interleaved chunk
//! 2. Wrap in AudioBlock at the capture rate
//! 3. Resampler::process → mono samples at the target rate
//! 4. SlidingVadWindow::evaluate → Option<VadVerdict>
//! 5. UtteranceAssembler::push → Option<Utterance>
//! 6. Flushed utterances go into the bounded SPSC utterance queue
//! ```
//!
//! This entire loop runs in `spawn_blocking`, keeping the Tokio async
//! executor free. The transcription consumer drains the queue on its own
//! thread — nothing slow ever runs here, and nothing here ever runs on the
//! device callback thread.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{SendTimeoutError, Sender};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    audio::resample::Resampler,
    buffering::{block::AudioBlock, AudioConsumer, Consumer},
    engine::EngineConfig,
    ipc::events::AudioActivityEvent,
    segment::{Utterance, UtteranceAssembler},
    vad::SlidingVadWindow,
};

pub struct PipelineDiagnostics {
    pub samples_in: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub blocks_dropped: AtomicUsize,
    pub vad_windows: AtomicUsize,
    pub vad_speech: AtomicUsize,
    pub utterances_flushed: AtomicUsize,
    pub utterances_discarded: AtomicUsize,
}

impl Default for PipelineDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            samples_resampled: AtomicUsize::new(0),
            blocks_dropped: AtomicUsize::new(0),
            vad_windows: AtomicUsize::new(0),
            vad_speech: AtomicUsize::new(0),
            utterances_flushed: AtomicUsize::new(0),
            utterances_discarded: AtomicUsize::new(0),
        }
    }
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.blocks_dropped.store(0, Ordering::Relaxed);
        self.vad_windows.store(0, Ordering::Relaxed);
        self.vad_speech.store(0, Ordering::Relaxed);
        self.utterances_flushed.store(0, Ordering::Relaxed);
        self.utterances_discarded.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            vad_windows: self.vad_windows.load(Ordering::Relaxed),
            vad_speech: self.vad_speech.load(Ordering::Relaxed),
            utterances_flushed: self.utterances_flushed.load(Ordering::Relaxed),
            utterances_discarded: self.utterances_discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub samples_resampled: usize,
    pub blocks_dropped: usize,
    pub vad_windows: usize,
    pub vad_speech: usize,
    pub utterances_flushed: usize,
    pub utterances_discarded: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: EngineConfig,
    pub window: SlidingVadWindow,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub utterance_tx: Sender<Utterance>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub capture_sample_rate: u32,
    pub capture_channels: u16,
    pub diagnostics: Arc<PipelineDiagnostics>,
}

/// Frames drained from the ring buffer per iteration: 20 ms at 48 kHz,
/// 60 ms at 16 kHz. Matches the resampler's input chunk so conversion
/// starts on the first full drain.
const DRAIN_FRAMES: usize = 960;

/// Minimum sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY_MS: u64 = 5;

/// How long one blocked enqueue attempt waits before re-checking the run flag.
const SEND_RETRY_MS: u64 = 100;

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!(
        capture_rate = ctx.capture_sample_rate,
        channels = ctx.capture_channels,
        target_rate = ctx.config.target_sample_rate,
        "pipeline started"
    );

    let mut resampler = match Resampler::new(ctx.capture_sample_rate, ctx.config.target_sample_rate)
    {
        Ok(r) => r,
        Err(e) => {
            error!("failed to create resampler: {e}");
            return;
        }
    };

    let mut assembler = UtteranceAssembler::new(&ctx.config);

    let channels = ctx.capture_channels.max(1) as usize;
    // Drain scratch, reused each iteration.
    let mut raw = vec![0f32; DRAIN_FRAMES * channels];
    // Interleaved samples carried over until a whole frame is available.
    let mut carry: Vec<f32> = Vec::new();
    let mut activity_seq = 0u64;

    loop {
        // ── 0. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Drain ring buffer ──────────────────────────────────────────
        let n = ctx.consumer.pop_slice(&mut raw);

        if n == 0 {
            // Nothing to process — yield to avoid burning 100 % CPU
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }

        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        // ── 2. Frame-align and wrap ───────────────────────────────────────
        carry.extend_from_slice(&raw[..n]);
        let usable = carry.len() - carry.len() % channels;
        if usable == 0 {
            continue;
        }
        let block = AudioBlock::new(
            carry.drain(..usable).collect(),
            channels as u16,
            ctx.capture_sample_rate,
        );

        // ── 3. Resample to target rate ────────────────────────────────────
        let resampled = match resampler.process(&block) {
            Ok(samples) => samples,
            Err(e) => {
                // Device fault policy: drop the block, keep the stream.
                warn!("dropping audio block: {e}");
                ctx.diagnostics.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };
        if resampled.is_empty() {
            // Partial chunk — waiting for more data to fill the filter input
            continue;
        }
        ctx.diagnostics
            .samples_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);

        // ── 4. Sliding-window VAD ─────────────────────────────────────────
        let verdict = ctx.window.evaluate(&resampled);
        if let Some(ref v) = verdict {
            ctx.diagnostics.vad_windows.fetch_add(1, Ordering::Relaxed);
            if v.is_speech() {
                ctx.diagnostics.vad_speech.fetch_add(1, Ordering::Relaxed);
            }
        }

        // ── 5. Utterance assembly ─────────────────────────────────────────
        let flushed = assembler.push(&resampled, verdict.as_ref());

        let activity = AudioActivityEvent {
            seq: activity_seq,
            rms: compute_rms(&resampled),
            speaking: assembler.is_speaking(),
        };
        activity_seq = activity_seq.saturating_add(1);
        let _ = ctx.activity_tx.send(activity);

        debug!(
            raw = n,
            resampled = resampled.len(),
            speaking = assembler.is_speaking(),
            "processed audio chunk"
        );

        // ── 6. Enqueue completed utterances ───────────────────────────────
        if let Some(utterance) = flushed {
            if !enqueue_utterance(&ctx, utterance) {
                break;
            }
        }
    }

    // Stream stopped. The shutdown policy for an in-progress utterance is
    // explicit configuration, not a guess.
    if assembler.is_speaking() {
        match assembler.finish() {
            Some(utterance) => {
                let _ = enqueue_utterance(&ctx, utterance);
            }
            None => {
                ctx.diagnostics
                    .utterances_discarded
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        samples_resampled = snap.samples_resampled,
        blocks_dropped = snap.blocks_dropped,
        vad_windows = snap.vad_windows,
        vad_speech = snap.vad_speech,
        utterances_flushed = snap.utterances_flushed,
        utterances_discarded = snap.utterances_discarded,
        "pipeline stopped — diagnostics"
    );
}

/// Enqueue with backpressure: block while the engine runs, never drop a
/// flush result on the producer side. Returns `false` when the queue is
/// gone and the pipeline should stop.
fn enqueue_utterance(ctx: &PipelineContext, utterance: Utterance) -> bool {
    let id = utterance.id;
    let samples = utterance.samples.len();
    let mut pending = utterance;

    loop {
        match ctx
            .utterance_tx
            .send_timeout(pending, Duration::from_millis(SEND_RETRY_MS))
        {
            Ok(()) => {
                ctx.diagnostics
                    .utterances_flushed
                    .fetch_add(1, Ordering::Relaxed);
                info!(utterance_id = id, samples, "utterance queued");
                return true;
            }
            Err(SendTimeoutError::Timeout(returned)) => {
                if !ctx.running.load(Ordering::Relaxed) {
                    // Shutdown with a stalled consumer: dropping is the
                    // only exit, and it is logged, never silent.
                    warn!(
                        utterance_id = id,
                        "consumer stalled during shutdown — dropping queued utterance"
                    );
                    ctx.diagnostics
                        .utterances_discarded
                        .fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                debug!(utterance_id = id, "utterance queue full — applying backpressure");
                pending = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                error!(utterance_id = id, "utterance queue closed — stopping pipeline");
                return false;
            }
        }
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq = samples.iter().map(|s| s * s).sum::<f32>();
    (sum_sq / samples.len() as f32).sqrt()
}
