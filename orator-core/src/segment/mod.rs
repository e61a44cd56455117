//! End-of-utterance state machine.
//!
//! ## States
//!
//! ```text
//!            verdict non-empty (copy lookback pre-roll, start utterance)
//!   IDLE ──────────────────────────────────────────────────────► SPEAKING
//!     ▲                                                             │
//!     └─────────────────────────────────────────────────────────────┘
//!            silence ≥ min_silence (flush utterance to caller)
//! ```
//!
//! While `IDLE`, incoming audio only feeds the lookback ring so speech
//! onset that predates classifier confirmation can be recovered. While
//! `SPEAKING`, every chunk — speech or short silence — is appended to the
//! in-progress utterance, so an utterance merges across gaps shorter than
//! the silence threshold and keeps its trailing words.
//!
//! Silence is measured in samples against the stream's sample clock, never
//! wall-clock time, so callback jitter cannot shorten or stretch the
//! timeout.

use tracing::{debug, info, warn};

use crate::engine::EngineConfig;
use crate::vad::VadVerdict;

/// One complete spoken utterance, flushed out of the assembler.
///
/// Immutable once emitted; the consumer side owns it outright.
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Monotonically increasing utterance number within one stream.
    pub id: u64,
    /// Mono samples at `sample_rate`, lookback pre-roll included.
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Absolute stream index of `samples[0]`.
    pub first_sample: u64,
}

impl Utterance {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Stream time of the utterance start, in seconds.
    pub fn start_secs(&self) -> f64 {
        self.first_sample as f64 / self.sample_rate as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Speaking,
}

/// Bounded pre-roll ring. Retained in both phases so pre-speech audio is
/// always available when onset is confirmed.
struct LookbackRing {
    buf: Vec<f32>,
    capacity: usize,
}

impl LookbackRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn extend(&mut self, samples: &[f32]) {
        if self.capacity == 0 || samples.is_empty() {
            return;
        }
        if samples.len() >= self.capacity {
            self.buf.clear();
            self.buf
                .extend_from_slice(&samples[samples.len() - self.capacity..]);
            return;
        }

        let needed = self.buf.len() + samples.len();
        if needed > self.capacity {
            self.buf.drain(..needed - self.capacity);
        }
        self.buf.extend_from_slice(samples);
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn copy_into(&self, out: &mut Vec<f32>) {
        out.extend_from_slice(&self.buf);
    }
}

/// Consumes per-block verdicts and samples, emits complete utterances.
///
/// Exclusively owned and mutated by the pipeline thread; consumers only
/// ever see the immutable `Utterance` values it returns.
pub struct UtteranceAssembler {
    sample_rate: u32,
    min_silence_samples: u64,
    max_utterance_samples: usize,
    flush_on_stop: bool,

    phase: Phase,
    lookback: LookbackRing,
    utterance: Vec<f32>,
    /// Absolute stream index of the current utterance's first sample.
    first_sample: u64,
    /// Absolute index just past the last confirmed speech sample.
    last_speech_sample: u64,
    /// Running sample clock, advanced on every push.
    total_samples_seen: u64,
    next_id: u64,
}

impl UtteranceAssembler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.target_sample_rate,
            min_silence_samples: config.min_silence_samples(),
            max_utterance_samples: config.max_utterance_samples(),
            flush_on_stop: config.flush_on_stop,
            phase: Phase::Idle,
            lookback: LookbackRing::new(config.lookback_samples()),
            utterance: Vec::new(),
            first_sample: 0,
            last_speech_sample: 0,
            total_samples_seen: 0,
            next_id: 0,
        }
    }

    /// Feed one resampled chunk with its verdict (`None` while the sliding
    /// window is still filling). Returns a complete utterance when the
    /// end-of-utterance condition fires.
    ///
    /// The silence timeout uses `silence >= min_silence` in samples, where
    /// `silence = total_samples_seen - last_speech_sample`.
    pub fn push(&mut self, samples: &[f32], verdict: Option<&VadVerdict>) -> Option<Utterance> {
        let chunk_start = self.total_samples_seen;
        self.total_samples_seen += samples.len() as u64;

        let speech = verdict.map(VadVerdict::is_speech).unwrap_or(false);
        if speech {
            if let Some(end) = verdict.and_then(VadVerdict::latest_speech_end) {
                self.last_speech_sample = end;
            }
        }

        match self.phase {
            Phase::Idle if speech => {
                // Speech confirmed — recover the pre-roll first. The
                // lookback does not yet contain this chunk, so the
                // boundary sample is never duplicated.
                self.utterance.clear();
                self.first_sample = chunk_start - self.lookback.len() as u64;
                self.lookback.copy_into(&mut self.utterance);
                self.utterance.extend_from_slice(samples);
                self.phase = Phase::Speaking;
                debug!(
                    utterance_id = self.next_id,
                    preroll_samples = self.lookback.len(),
                    "speech onset — utterance started"
                );
                self.lookback.extend(samples);
                self.force_flush_if_oversized()
            }

            Phase::Idle => {
                self.lookback.extend(samples);
                None
            }

            Phase::Speaking => {
                // Append in silence too: speech may resume within the
                // timeout and trailing words must not be clipped.
                self.utterance.extend_from_slice(samples);
                self.lookback.extend(samples);

                if !speech {
                    let silence = self.total_samples_seen - self.last_speech_sample;
                    if silence >= self.min_silence_samples {
                        return Some(self.flush());
                    }
                }
                self.force_flush_if_oversized()
            }
        }
    }

    /// Stream stopped. Per policy, an in-progress utterance is discarded
    /// unless `flush_on_stop` was configured — a buffer without a detected
    /// end is not ordinarily emitted as speech.
    pub fn finish(&mut self) -> Option<Utterance> {
        if self.phase != Phase::Speaking {
            return None;
        }
        self.phase = Phase::Idle;

        if self.flush_on_stop && !self.utterance.is_empty() {
            info!(
                samples = self.utterance.len(),
                "stream stopped mid-utterance — flushing partial buffer"
            );
            return Some(self.take_utterance());
        }

        info!(
            samples = self.utterance.len(),
            "stream stopped mid-utterance — discarding partial buffer"
        );
        self.utterance.clear();
        None
    }

    /// True while accumulating an utterance.
    pub fn is_speaking(&self) -> bool {
        self.phase == Phase::Speaking
    }

    /// Running sample clock (advances in lockstep with the VAD window).
    pub fn total_samples_seen(&self) -> u64 {
        self.total_samples_seen
    }

    fn flush(&mut self) -> Utterance {
        self.phase = Phase::Idle;
        let utterance = self.take_utterance();
        debug!(
            utterance_id = utterance.id,
            samples = utterance.samples.len(),
            "end of utterance — flushing"
        );
        utterance
    }

    /// Keep memory bounded under continuous speech: emit what we have and
    /// keep accumulating in the same phase.
    fn force_flush_if_oversized(&mut self) -> Option<Utterance> {
        if self.max_utterance_samples == 0 || self.utterance.len() < self.max_utterance_samples {
            return None;
        }
        warn!(
            samples = self.utterance.len(),
            "utterance reached maximum length — forcing flush"
        );
        let utterance = self.take_utterance();
        self.first_sample = self.total_samples_seen;
        Some(utterance)
    }

    fn take_utterance(&mut self) -> Utterance {
        let id = self.next_id;
        self.next_id += 1;
        Utterance {
            id,
            samples: std::mem::take(&mut self.utterance),
            sample_rate: self.sample_rate,
            first_sample: self.first_sample,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::SpeechSpan;

    const BLOCK: usize = 512;
    const RATE: u32 = 16_000;

    fn config() -> EngineConfig {
        EngineConfig {
            target_sample_rate: RATE,
            min_silence_secs: 1.0,
            lookback_secs: 1.0,
            ..EngineConfig::default()
        }
    }

    /// Verdict whose last speech segment ends exactly at `end`.
    fn speech_until(end: u64) -> VadVerdict {
        VadVerdict {
            segments: vec![SpeechSpan {
                start: end.saturating_sub(BLOCK as u64),
                end,
            }],
        }
    }

    fn silence() -> VadVerdict {
        VadVerdict::default()
    }

    struct Harness {
        assembler: UtteranceAssembler,
        fed: u64,
    }

    impl Harness {
        fn new(config: &EngineConfig) -> Self {
            Self {
                assembler: UtteranceAssembler::new(config),
                fed: 0,
            }
        }

        fn speech_block(&mut self) -> Option<Utterance> {
            self.fed += BLOCK as u64;
            let verdict = speech_until(self.fed);
            self.assembler.push(&vec![0.5; BLOCK], Some(&verdict))
        }

        fn silent_block(&mut self) -> Option<Utterance> {
            self.fed += BLOCK as u64;
            self.assembler.push(&vec![0.0; BLOCK], Some(&silence()))
        }

        fn unscored_block(&mut self) -> Option<Utterance> {
            self.fed += BLOCK as u64;
            self.assembler.push(&vec![0.0; BLOCK], None)
        }
    }

    #[test]
    fn initial_state_is_idle() {
        let assembler = UtteranceAssembler::new(&config());
        assert!(!assembler.is_speaking());
    }

    #[test]
    fn silence_never_starts_an_utterance() {
        let mut h = Harness::new(&config());
        for _ in 0..100 {
            assert!(h.silent_block().is_none());
        }
        assert!(!h.assembler.is_speaking());
    }

    #[test]
    fn unscored_blocks_behave_as_silence() {
        let mut h = Harness::new(&config());
        for _ in 0..10 {
            assert!(h.unscored_block().is_none());
        }
        assert!(!h.assembler.is_speaking());
    }

    #[test]
    fn one_utterance_for_speech_between_silences() {
        // [silence]*50, [speech]*20, [silence]*K with K·BLOCK ≥ 1 s.
        let mut h = Harness::new(&config());
        for _ in 0..50 {
            assert!(h.silent_block().is_none());
        }
        for _ in 0..20 {
            assert!(h.speech_block().is_none());
        }
        assert!(h.assembler.is_speaking());

        // 16000 / 512 = 31.25 → the threshold crosses on the 32nd silent block.
        let mut flushed = None;
        let mut trailing = 0;
        for _ in 0..40 {
            trailing += 1;
            if let Some(u) = h.silent_block() {
                flushed = Some(u);
                break;
            }
        }
        let utterance = flushed.expect("utterance should flush after the silence timeout");
        assert_eq!(trailing, 32);
        assert!(!h.assembler.is_speaking());

        // Lookback pre-roll (full 1 s ring) + 20 speech blocks + the
        // trailing silent blocks accumulated before the threshold crossed.
        let expected = RATE as usize + (20 + 32) * BLOCK;
        assert_eq!(utterance.samples.len(), expected);
        assert_eq!(utterance.id, 0);

        // No further flushes once idle again.
        for _ in 0..8 {
            assert!(h.silent_block().is_none());
        }
    }

    #[test]
    fn short_gap_merges_into_one_utterance() {
        let mut h = Harness::new(&config());
        for _ in 0..5 {
            h.speech_block();
        }
        // 20 silent blocks = 10240 samples < 16000 — no flush.
        for _ in 0..20 {
            assert!(h.silent_block().is_none());
        }
        assert!(h.assembler.is_speaking());

        // Speech resumes, then a full timeout.
        for _ in 0..5 {
            h.speech_block();
        }
        let mut flushed = None;
        for _ in 0..40 {
            if let Some(u) = h.silent_block() {
                flushed = Some(u);
                break;
            }
        }
        let utterance = flushed.expect("merged utterance should flush");
        // Everything accumulated since onset is in one buffer: the gap was
        // kept, not truncated.
        assert!(utterance.samples.len() > (5 + 20 + 5) * BLOCK);
    }

    #[test]
    fn preroll_excludes_triggering_chunk() {
        // Feed exactly one silent block, then speech: the utterance must
        // contain that block once as pre-roll plus the speech chunk once.
        let mut h = Harness::new(&config());
        h.silent_block();
        h.speech_block();
        assert!(h.assembler.is_speaking());

        let mut flushed = None;
        for _ in 0..40 {
            if let Some(u) = h.silent_block() {
                flushed = Some(u);
                break;
            }
        }
        let utterance = flushed.unwrap();
        assert_eq!(utterance.first_sample, 0);
        // 1 pre-roll block + 1 speech block + 32 trailing silent blocks.
        assert_eq!(utterance.samples.len(), 34 * BLOCK);
    }

    #[test]
    fn lookback_ring_stays_bounded() {
        let cfg = config();
        let mut h = Harness::new(&cfg);
        for _ in 0..500 {
            h.silent_block();
        }
        h.speech_block();
        let mut flushed = None;
        for _ in 0..40 {
            if let Some(u) = h.silent_block() {
                flushed = Some(u);
                break;
            }
        }
        let utterance = flushed.unwrap();
        // Pre-roll capped at lookback_secs worth of audio.
        assert_eq!(
            utterance.samples.len(),
            cfg.lookback_samples() + 33 * BLOCK
        );
        assert_eq!(
            utterance.first_sample,
            500 * BLOCK as u64 - cfg.lookback_samples() as u64
        );
    }

    #[test]
    fn finish_discards_partial_utterance_by_default() {
        let mut h = Harness::new(&config());
        for _ in 0..10 {
            h.speech_block();
        }
        assert!(h.assembler.is_speaking());
        assert!(h.assembler.finish().is_none());
        assert!(!h.assembler.is_speaking());
    }

    #[test]
    fn finish_flushes_when_configured() {
        let mut cfg = config();
        cfg.flush_on_stop = true;
        let mut h = Harness::new(&cfg);
        for _ in 0..10 {
            h.speech_block();
        }
        let utterance = h.assembler.finish().expect("flush_on_stop should emit");
        assert_eq!(utterance.samples.len(), 10 * BLOCK);
    }

    #[test]
    fn finish_while_idle_is_a_noop() {
        let mut h = Harness::new(&config());
        h.silent_block();
        assert!(h.assembler.finish().is_none());
    }

    #[test]
    fn oversized_utterance_force_flushes_and_continues() {
        let mut cfg = config();
        cfg.lookback_secs = 0.0;
        cfg.max_utterance_secs = 1.0; // 16000 samples ≈ 31.25 blocks
        let mut h = Harness::new(&cfg);

        let mut forced = None;
        let mut blocks = 0;
        for _ in 0..100 {
            blocks += 1;
            if let Some(u) = h.speech_block() {
                forced = Some(u);
                break;
            }
        }
        let utterance = forced.expect("max-length flush should fire");
        assert_eq!(blocks, 32);
        assert_eq!(utterance.samples.len(), 32 * BLOCK);
        // Still speaking — the next utterance accumulates from here.
        assert!(h.assembler.is_speaking());

        let mut next = None;
        for _ in 0..40 {
            if let Some(u) = h.silent_block() {
                next = Some(u);
                break;
            }
        }
        let follow_up = next.expect("trailing silence should flush the continuation");
        assert_eq!(follow_up.id, utterance.id + 1);
        assert_eq!(follow_up.first_sample, 32 * BLOCK as u64);
    }

    #[test]
    fn utterance_ids_are_sequential() {
        let mut h = Harness::new(&config());
        let mut ids = Vec::new();
        for _ in 0..3 {
            h.speech_block();
            for _ in 0..40 {
                if let Some(u) = h.silent_block() {
                    ids.push(u.id);
                    break;
                }
            }
        }
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
