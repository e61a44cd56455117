use thiserror::Error;

/// All errors produced by orator-core.
#[derive(Debug, Error)]
pub enum OratorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("voice-activity classifier error: {0}")]
    Classifier(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("utterance queue closed — consumer is gone")]
    UtteranceQueueClosed,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OratorError>;
