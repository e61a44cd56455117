//! Orator service entry point.
//!
//! Wires the engine to the outside world: YAML config + CLI overrides,
//! detector selection, transcript subscription, and TCP/stdout
//! publication. Runs until interrupted.

mod config;
mod publish;

use std::time::Duration;

use clap::Parser;
use earshot::VoiceActivityProfile;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use orator_core::audio::device::list_input_devices;
use orator_core::inference::stub::StubTranscriber;
use orator_core::vad::{EnergyDetector, SpeechDetector};
use orator_core::{EarshotDetector, OratorEngine, TranscriberHandle};

use config::{AppConfig, Cli, DetectorKind, VadAggressiveness};
use publish::Publisher;

/// Small delay after binding so early subscribers catch the first
/// transcript (slow-joiner problem).
const SUBSCRIBER_GRACE: Duration = Duration::from_millis(100);

fn build_detector(conf: &AppConfig) -> Box<dyn SpeechDetector> {
    match conf.engine.detector {
        DetectorKind::Energy => Box::new(EnergyDetector::new(conf.engine.energy_threshold)),
        DetectorKind::Webrtc => {
            let profile = match conf.engine.vad_aggressiveness {
                VadAggressiveness::Quality => VoiceActivityProfile::QUALITY,
                VadAggressiveness::Lbr => VoiceActivityProfile::LBR,
                VadAggressiveness::Aggressive => VoiceActivityProfile::AGGRESSIVE,
                VadAggressiveness::VeryAggressive => VoiceActivityProfile::VERY_AGGRESSIVE,
            };
            Box::new(EarshotDetector::new(profile))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for device in list_input_devices() {
            let default = if device.is_default { " (default)" } else { "" };
            let rate = device
                .default_sample_rate
                .map(|r| format!(" @ {r} Hz"))
                .unwrap_or_default();
            println!("{}{}{}", device.name, rate, default);
        }
        return Ok(());
    }

    let mut conf = AppConfig::load(cli.config.as_deref())?;
    conf.apply_overrides(&cli);

    let engine = OratorEngine::new(
        conf.engine_config(),
        Some(TranscriberHandle::new(StubTranscriber::new())),
    )?;
    engine.warm_up()?;

    let mut transcripts = engine.subscribe_transcripts();
    engine.start(build_detector(&conf))?;

    let mut publisher = if conf.publish.enabled {
        let addr = conf.publish.socket_addr();
        if conf.publish.bind {
            let p = Publisher::bind(&addr, &conf.publish.topic).await?;
            tokio::time::sleep(SUBSCRIBER_GRACE).await;
            p
        } else {
            Publisher::connect(&addr, &conf.publish.topic).await?
        }
    } else {
        Publisher::stdout(&conf.publish.topic)
    };

    info!("Listening... Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            event = transcripts.recv() => match event {
                Ok(event) => {
                    let text = event.joined_text();
                    if text.is_empty() {
                        continue;
                    }
                    info!(
                        utterance_id = event.utterance_id,
                        text = %text,
                        "transcribed speech"
                    );
                    publisher.publish(&text).await;
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("publisher lagged — {n} transcript event(s) skipped");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    engine.stop()?;
    info!("stopped");
    Ok(())
}
