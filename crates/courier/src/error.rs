//! Error types for Courier.

use courier_connection::ConnectionError;
use courier_store::StoreError;
use courier_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while running a Courier job.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Connection lifecycle error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Session sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// Logging was already initialized.
    #[error("logging error: {0}")]
    Logging(String),
}

impl CourierError {
    /// True when an operator must act before the job can succeed.
    pub fn is_operator_action(&self) -> bool {
        matches!(self, CourierError::Connection(e) if e.is_operator_action())
    }

    /// True when rerunning the job may succeed on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            CourierError::Connection(e) => e.is_retryable(),
            CourierError::Sync(SyncError::Remote(_)) => true,
            _ => false,
        }
    }
}

/// Result type for Courier operations.
pub type Result<T> = std::result::Result<T, CourierError>;
