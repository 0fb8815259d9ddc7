//! Error types for the contractfill pipeline.

use thiserror::Error;

/// Errors that can occur while filling contract state.
#[derive(Debug, Error)]
pub enum FillerError {
    /// Startup configuration is unusable (missing account, contract not
    /// deployed, required upstream table empty).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A contract guarantee was contradicted by the block being processed.
    #[error("Integrity violation in '{contract}': {reason}")]
    Integrity { contract: String, reason: String },

    /// An insert collided with an existing row of the same natural key.
    #[error("Natural key conflict in table '{table}' for key {key}")]
    KeyConflict { table: String, key: String },

    /// Storage I/O failure. The block transaction is lost and may be retried.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Upstream chain (stream or state API) failure.
    #[error("Chain error: {0}")]
    Chain(String),

    /// A periodic job failed.
    #[error("Job '{job}' failed: {reason}")]
    Job { job: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FillerError {
    pub fn integrity(contract: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            contract: contract.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if retrying the whole block from its start may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Chain(_))
    }

    /// Returns `true` if the error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Integrity { .. } | Self::KeyConflict { .. }
        )
    }
}
