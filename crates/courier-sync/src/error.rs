//! Error types for the sync module.

use thiserror::Error;

use courier_core::CoreError;
use courier_store::StoreError;

/// Errors that can occur during session sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No session archive stored yet. Expected on first run.
    #[error("no session archive at {key}")]
    ArchiveNotFound { key: String },

    /// The stored archive could not be extracted.
    #[error("corrupt session archive: {0}")]
    CorruptArchive(String),

    /// Packaging the local directory failed.
    #[error("failed to build archive: {0}")]
    ArchiveBuild(String),

    /// The blob store failed a request.
    #[error("remote sync failure: {0}")]
    Remote(#[source] StoreError),

    /// Reading or writing the local directory failed.
    #[error("local directory error: {0}")]
    Local(#[source] StoreError),

    /// Sync metadata could not be read or written.
    #[error("sync metadata error: {0}")]
    Metadata(#[from] CoreError),
}

impl SyncError {
    /// True when there was simply nothing to restore.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::ArchiveNotFound { .. })
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
