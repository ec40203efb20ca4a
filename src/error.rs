//! Error types for the companion runtime

use thiserror::Error;

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the companion runtime
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Neither text nor audio was provided, or transcription heard nothing
    #[error("no input data: provide text or audio")]
    NoInputData,

    /// Speech-to-text failure
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Language model stream failed to open or broke mid-stream
    #[error("model stream error: {0}")]
    ModelStream(String),

    /// Text-to-speech failure for a single sentence
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Transcript write failed
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Embedding vectors of different lengths were compared
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Memory candidate is too close to an existing memory
    #[error("duplicate memory: {distance:.3} from {existing_id}")]
    DuplicateMemory { existing_id: String, distance: f64 },

    /// Tool lookup or execution failure
    #[error("tool error: {0}")]
    Tool(String),

    /// Embedding provider error
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

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
    /// Whether this error ends a turn before any output is produced
    #[must_use]
    pub const fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            Self::NoInputData | Self::Transcription(_) | Self::Persistence(_)
        )
    }
}
