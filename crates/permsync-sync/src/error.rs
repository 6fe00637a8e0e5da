//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during a sync cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Repository read or write failed.
    #[error("store error: {0}")]
    StoreError(#[from] permsync_store::StoreError),

    /// An upstream provider integration failed.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),

    /// An upstream call did not finish within the configured timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The unrestricted baseline could not be resolved; the cycle was aborted.
    #[error("unrestricted baseline unavailable: {0}")]
    BaselineUnavailable(#[source] Box<SyncError>),

    /// Every resolution batch failed; the cycle was aborted.
    #[error("permission resolution failed for all {batches} batch(es): {source}")]
    ResolutionFailed {
        batches: usize,
        #[source]
        source: Box<SyncError>,
    },

    /// The principal enumerator failed; the cycle was aborted.
    #[error("principal enumeration failed: {0}")]
    EnumerationFailed(#[source] Box<SyncError>),

    /// A collaborator is deliberately unavailable (test doubles, health probes).
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
