//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during blob store or session directory operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Object or file not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path would escape the session directory.
    #[error("invalid path: {0}")]
    InvalidPath(#[from] courier_core::CoreError),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Remote backend rejected or failed the request.
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn poisoned(what: &str) -> Self {
        StoreError::Backend(format!("{what} lock poisoned"))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
