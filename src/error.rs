use crate::keymap::KeyId;

/// Failure reported by an OS key-injection backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InjectError {
    #[error("key injection is not permitted: {0}")]
    Denied(String),
    #[error("key injection backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KeyplayError {
    /// The only failure surfaced to the end user during playback.
    #[error("failed to inject key {key}: {source}")]
    Injection {
        key: KeyId,
        #[source]
        source: InjectError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] ron::error::SpannedError),
    #[error("failed to serialize configuration: {0}")]
    ConfigWrite(#[from] ron::Error),
    #[error("failed to parse MIDI file: {0}")]
    Midi(#[from] midly::Error),
}

pub type Result<T> = std::result::Result<T, KeyplayError>;
