//! Error types for permsync core.

use thiserror::Error;

/// Core errors raised while encoding or decoding permission data.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid principal id: {0:?}")]
    InvalidPrincipalId(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    #[error("unsupported encoding version: {0}")]
    UnsupportedVersion(u64),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
