//! Error types for beacon-voice

use thiserror::Error;

/// Result type alias for beacon-voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice conversation core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Synthesis was requested before the backend became ready
    #[error("synthesis backend not initialized")]
    NotInitialized,

    /// Synthesis engine is not usable in this environment
    #[error("synthesis engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A specific utterance failed to synthesize or play
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Speech was interrupted or canceled by an intentional stop
    #[error("speech interrupted")]
    Interrupted,

    /// Recognition stream failed
    #[error("recognition error ({code}): {message}")]
    Recognition {
        /// Engine error code (e.g. "no-speech", "network")
        code: String,
        /// Human readable message
        message: String,
    },

    /// Reasoning client failed
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// Another speak operation already holds the lock
    #[error("speaking lock already held")]
    SpeakingLockHeld,

    /// An operation exceeded its time bound
    #[error("timed out: {0}")]
    Timeout(String),

    /// Worker or orchestrator channel closed unexpectedly
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// Asset precache error
    #[error("asset error: {0}")]
    Asset(String),

    /// Audio output error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error was caused by an intentional stop rather than a failure
    #[must_use]
    pub const fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
