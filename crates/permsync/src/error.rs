//! Error types for the service.

use permsync_cluster::ClusterError;
use permsync_core::CoreError;
use permsync_store::StoreError;
use permsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur in service operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Data model error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync cycle error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Lock or eligibility error.
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration document could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Another cycle held the sync lock for the whole acquire budget.
    #[error("sync lock {0} is held elsewhere")]
    LockContended(String),

    /// Scheduler lifecycle misuse.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
