//! YAML configuration with command-line overrides.
//!
//! Precedence: built-in defaults < config file < CLI flags. Every field a
//! flag can touch is optional on the CLI side; `apply_overrides` writes
//! only the flags that were actually given.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use orator_core::engine::EngineConfig;

/// Which voice-activity classifier to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// RMS-threshold detector, dependency-free.
    Energy,
    /// WebRTC VAD (earshot).
    Webrtc,
}

/// WebRTC VAD operating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VadAggressiveness {
    Quality,
    Lbr,
    Aggressive,
    VeryAggressive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Publish transcripts over TCP; when false they only go to stdout.
    pub enabled: bool,
    pub addr: String,
    pub port: u16,
    /// Bind and fan out to subscribers (`true`) or connect to a collector.
    pub bind: bool,
    /// Topic label included with every published transcript.
    pub topic: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: "0.0.0.0".into(),
            port: 5555,
            bind: true,
            topic: "transcribed_speech".into(),
        }
    }
}

impl PublishConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub target_sample_rate: u32,
    /// Renewed silence that ends an utterance, in seconds.
    pub eou_silence_secs: f32,
    pub vad_window_secs: f32,
    pub lookback_secs: f32,
    pub max_utterance_secs: f32,
    pub flush_on_stop: bool,
    pub queue_capacity: usize,
    /// Input device name; unset selects the system default.
    pub device: Option<String>,
    /// Language bias for the transcription backend (e.g. "en").
    pub language: Option<String>,
    pub detector: DetectorKind,
    pub vad_aggressiveness: VadAggressiveness,
    pub energy_threshold: f32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            target_sample_rate: 16_000,
            eou_silence_secs: 1.0,
            vad_window_secs: 0.3,
            lookback_secs: 1.0,
            max_utterance_secs: 30.0,
            flush_on_stop: false,
            queue_capacity: 32,
            device: None,
            language: None,
            detector: DetectorKind::Webrtc,
            vad_aggressiveness: VadAggressiveness::Quality,
            energy_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub publish: PublishConfig,
    pub engine: EngineSection,
}

impl AppConfig {
    /// Load from a YAML file, or fall back to defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {path:?}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parsing config file {path:?}"))
    }

    /// Fold CLI flags over the file/default values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(v) = cli.publish_text {
            self.publish.enabled = v;
        }
        if let Some(ref v) = cli.addr {
            self.publish.addr = v.clone();
        }
        if let Some(v) = cli.port {
            self.publish.port = v;
        }
        if let Some(v) = cli.bind {
            self.publish.bind = v;
        }
        if let Some(ref v) = cli.topic {
            self.publish.topic = v.clone();
        }

        if let Some(v) = cli.eou_silence {
            self.engine.eou_silence_secs = v;
        }
        if let Some(v) = cli.target_sr {
            self.engine.target_sample_rate = v;
        }
        if let Some(ref v) = cli.device {
            self.engine.device = Some(v.clone());
        }
        if let Some(ref v) = cli.language {
            self.engine.language = Some(v.clone());
        }
        if let Some(v) = cli.detector {
            self.engine.detector = v;
        }
        if let Some(v) = cli.flush_on_stop {
            self.engine.flush_on_stop = v;
        }
    }

    /// Project the engine-relevant fields into a core `EngineConfig`.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            target_sample_rate: self.engine.target_sample_rate,
            vad_window_secs: self.engine.vad_window_secs,
            min_silence_secs: self.engine.eou_silence_secs,
            lookback_secs: self.engine.lookback_secs,
            max_utterance_secs: self.engine.max_utterance_secs,
            flush_on_stop: self.engine.flush_on_stop,
            queue_capacity: self.engine.queue_capacity,
            language_hint: self.engine.language.clone(),
            preferred_device: self.engine.device.clone(),
        }
    }
}

/// Transcribes user speech and publishes the text over TCP.
#[derive(Debug, Parser)]
#[command(name = "orator", version, about)]
pub struct Cli {
    /// YAML config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// List audio input devices and exit.
    #[arg(long)]
    pub list_devices: bool,

    // ── publish overrides ────────────────────────────────────────────────
    /// Enable or disable transcript publishing over TCP.
    #[arg(long, value_name = "BOOL")]
    pub publish_text: Option<bool>,

    /// IP address to publish to.
    #[arg(long, value_name = "ADDR")]
    pub addr: Option<String>,

    /// Port to publish to.
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Bind as a fan-out server instead of connecting out.
    #[arg(long, value_name = "BOOL")]
    pub bind: Option<bool>,

    /// Topic label attached to published transcripts.
    #[arg(long, value_name = "TOPIC")]
    pub topic: Option<String>,

    // ── engine overrides ─────────────────────────────────────────────────
    /// Silence duration (seconds) required to end an utterance.
    #[arg(long, value_name = "SECS")]
    pub eou_silence: Option<f32>,

    /// Target sample rate. The VAD requires 16 kHz.
    #[arg(long, value_name = "HZ")]
    pub target_sr: Option<u32>,

    /// Input device name (see --list-devices).
    #[arg(long, value_name = "NAME")]
    pub device: Option<String>,

    /// Language bias for the transcription model.
    #[arg(long, value_name = "CODE")]
    pub language: Option<String>,

    /// Voice-activity classifier to use.
    #[arg(long, value_enum, value_name = "KIND")]
    pub detector: Option<DetectorKind>,

    /// Flush (true) or discard (false) a half-spoken utterance on exit.
    #[arg(long, value_name = "BOOL")]
    pub flush_on_stop: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_flags() -> Cli {
        Cli::parse_from(["orator"])
    }

    #[test]
    fn defaults_match_upstream_service() {
        let cfg = AppConfig::default();
        assert!(cfg.publish.enabled);
        assert_eq!(cfg.publish.socket_addr(), "0.0.0.0:5555");
        assert_eq!(cfg.publish.topic, "transcribed_speech");
        assert_eq!(cfg.engine.target_sample_rate, 16_000);
        assert_eq!(cfg.engine.detector, DetectorKind::Webrtc);
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
publish:
  enabled: false
  port: 6001
  topic: lab
engine:
  eou_silence_secs: 1.5
  detector: energy
  language: en
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(!cfg.publish.enabled);
        assert_eq!(cfg.publish.port, 6001);
        assert_eq!(cfg.publish.topic, "lab");
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.publish.addr, "0.0.0.0");
        assert!((cfg.engine.eou_silence_secs - 1.5).abs() < 1e-6);
        assert_eq!(cfg.engine.detector, DetectorKind::Energy);
        assert_eq!(cfg.engine.language.as_deref(), Some("en"));
    }

    #[test]
    fn load_reads_file_and_missing_path_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "publish:\n  port: 7777").unwrap();
        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.publish.port, 7777);

        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.publish.port, 5555);

        assert!(AppConfig::load(Some(Path::new("/nonexistent/orator.yaml"))).is_err());
    }

    #[test]
    fn cli_flags_win_over_file_values() {
        let mut cfg: AppConfig = serde_yaml::from_str(
            "publish:\n  port: 6001\nengine:\n  eou_silence_secs: 2.0\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "orator",
            "--port",
            "9000",
            "--eou-silence",
            "0.5",
            "--detector",
            "energy",
            "--language",
            "de",
        ]);
        cfg.apply_overrides(&cli);

        assert_eq!(cfg.publish.port, 9000);
        assert!((cfg.engine.eou_silence_secs - 0.5).abs() < 1e-6);
        assert_eq!(cfg.engine.detector, DetectorKind::Energy);
        assert_eq!(cfg.engine.language.as_deref(), Some("de"));
    }

    #[test]
    fn no_flags_touch_nothing() {
        let mut cfg = AppConfig::default();
        cfg.engine.eou_silence_secs = 2.5;
        cfg.apply_overrides(&no_flags());
        assert!((cfg.engine.eou_silence_secs - 2.5).abs() < 1e-6);
    }

    #[test]
    fn engine_config_projection_is_valid() {
        let cfg = AppConfig::default();
        let engine = cfg.engine_config();
        assert!(engine.validate().is_ok());
        assert!((engine.min_silence_secs - cfg.engine.eou_silence_secs).abs() < 1e-6);
    }
}
