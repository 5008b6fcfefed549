//! Error types for Courier core.

use thiserror::Error;

/// Errors raised while validating or decoding core values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid destination: {0:?}")]
    InvalidDestination(String),

    #[error("invalid relative path: {0:?}")]
    InvalidPath(String),

    #[error("sync metadata could not be decoded: {0}")]
    MetadataDecode(String),

    #[error("sync metadata could not be encoded: {0}")]
    MetadataEncode(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
