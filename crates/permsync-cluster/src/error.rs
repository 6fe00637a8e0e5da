//! Error types for the cluster module.

use thiserror::Error;

/// Errors from lock providers and the coordinator.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Database error from the lease table.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The lock could not be acquired within the retry budget.
    #[error("lock {name} not acquired within {waited_ms}ms")]
    AcquireTimeout { name: String, waited_ms: u64 },

    /// Lock state lock poisoned.
    #[error("lock state poisoned: {0}")]
    Poisoned(String),

    /// Blocking task panicked or was cancelled.
    #[error("blocking task failed: {0}")]
    TaskFailed(String),

    /// Invalid lock options.
    #[error("invalid lock options: {0}")]
    InvalidOptions(String),
}

/// Result type for cluster operations.
pub type Result<T> = std::result::Result<T, ClusterError>;
