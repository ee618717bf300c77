//! Error types for the arena
//!
//! Provides error handling for:
//! - Backend call failures (recovered into failed results, never propagated)
//! - Persistence failures (logged, never fatal to in-memory state)
//! - Configuration loading and validation
//! - Calling-layer validation of runs and saves

use crate::types::{ExperimentId, ModelId};

/// Main arena error type
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// Run options rejected before dispatch
    #[error("invalid experiment options: {0}")]
    InvalidOptions(String),

    /// Save request rejected by the calling layer
    #[error("invalid save: {0}")]
    InvalidSave(String),

    /// Saved experiment not in the library
    #[error("unknown experiment: {0}")]
    UnknownExperiment(ExperimentId),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistence error
    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),

    /// History collaborator error
    #[error("history error: {0}")]
    History(#[from] HistoryError),
}

/// Failure of a single model backend call
///
/// The `Display` text becomes the `failure` message of the model's result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Call exceeded the configured timeout
    #[error("request timed out after {secs}s")]
    Timeout { secs: f64 },

    /// Network or transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider answered with something unusable
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Provider refused the request (auth, quota, unknown model)
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Backend task panicked
    #[error("backend call panicked: {0}")]
    Panicked(String),
}

impl BackendError {
    /// Check if error is transient and worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

/// Durable state storage errors
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Filesystem failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document cannot be decoded
    #[error("corrupt state document: {0}")]
    Corrupt(String),

    /// State cannot be encoded
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file unreadable
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for this schema
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Same model listed twice
    #[error("duplicate model id: {0}")]
    DuplicateModel(ModelId),

    /// Price is negative or not finite
    #[error("invalid price for {model}: {price}")]
    InvalidPrice { model: ModelId, price: f64 },

    /// Achievement definition is unusable
    #[error("invalid achievement {id}: {reason}")]
    InvalidAchievement { id: String, reason: String },

    /// Migration target is itself a retired id
    #[error("migration chain: {from} -> {to} and {to} is also retired")]
    MigrationChain { from: ModelId, to: ModelId },

    /// Timeout is zero or not finite
    #[error("invalid request timeout: {0}")]
    InvalidTimeout(f64),
}

/// History collaborator errors
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Store unreachable or refused the operation
    #[error("history store unavailable: {0}")]
    Unavailable(String),
}
