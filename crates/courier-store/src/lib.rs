//! # Courier Store
//!
//! Storage capabilities for Courier: the durable [`BlobStore`] the session
//! is persisted to, and the ephemeral [`SessionDirectory`] the transport
//! reads credentials from.
//!
//! ## Key Types
//!
//! - [`BlobStore`] - Async put/get/exists/list/delete by key
//! - [`SqliteBlobStore`] - SQLite-backed durable blob store
//! - [`MemoryBlobStore`] - In-memory blob store for tests, with request counters
//! - [`SessionDirectory`] - Relative-path file access plus recursive listing
//! - [`FsSessionDirectory`] - Session directory on local disk
//! - [`MemorySessionDirectory`] - In-memory directory with settable mtimes
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier_store::{BlobStore, SqliteBlobStore};
//!
//! async fn example() {
//!     let store = SqliteBlobStore::open("courier-blobs.db").unwrap();
//!     store
//!         .put("session/auth-state.zip", vec![], "application/zip")
//!         .await
//!         .unwrap();
//!     let keys = store.list("session/").await.unwrap();
//!     assert_eq!(keys.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Missing is not an error**: `get` and `read_file` return `None`
//! - **Idempotent deletes**: deleting a missing key succeeds
//! - **Path safety**: relative paths are normalized and may not escape the root

pub mod error;
pub mod local;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use local::FsSessionDirectory;
pub use memory::{MemoryBlobStore, MemorySessionDirectory};
pub use sqlite::SqliteBlobStore;
pub use traits::{BlobStore, LocalFile, SessionDirectory};

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
