//! Error types for the voice assistant

use thiserror::Error;

use crate::skills::SkillError;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech backend failure (wake word, capture, or transcription)
    #[error("speech provider error: {0}")]
    Provider(String),

    /// Text-to-speech backend failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Wake word detection error
    #[error("wake word error: {0}")]
    WakeWord(String),

    /// A skill with this name is already registered
    #[error("duplicate skill name: {0}")]
    DuplicateSkillName(String),

    /// An intent pattern could not be compiled
    #[error("invalid intent pattern: {0}")]
    InvalidPattern(String),

    /// Handler-reported skill failure
    #[error(transparent)]
    Skill(#[from] SkillError),

    /// Every worker is busy
    #[error("worker pool exhausted ({capacity} workers busy)")]
    WorkerPoolExhausted {
        /// Configured pool size
        capacity: usize,
    },

    /// A session stage ran past its deadline
    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(&'static str),

    /// Event subscriber failure
    #[error("event handler error: {0}")]
    EventHandler(String),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Regex compilation error
    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}
