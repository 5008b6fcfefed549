//! # Courier Sync
//!
//! Mirrors a local session directory to and from a durable blob store.
//!
//! ## Overview
//!
//! Two modes share one engine:
//!
//! - **Archive mode** transfers the session credentials as a single zip. A
//!   pull always yields a self-consistent snapshot, never a mix of old and
//!   rotated key files.
//! - **Incremental mode** transfers general application data file by file,
//!   skipping anything whose blake3 hash matches the stored metadata record.
//!   A file that was only touched has its recorded mtime refreshed instead.
//!
//! ## Key Properties
//!
//! - **All-or-nothing credentials**: archives are extracted fully before the
//!   local directory is replaced
//! - **First run is not an error**: a missing archive is
//!   [`SyncError::ArchiveNotFound`], distinct from [`SyncError::CorruptArchive`]
//! - **Idempotent**: a second incremental push with no changes uploads nothing
//! - **Bounded**: transfers run in fixed-size concurrent batches
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier_store::{FsSessionDirectory, SqliteBlobStore};
//! use courier_sync::{SessionSyncEngine, SyncConfig};
//!
//! async fn example() {
//!     let store = SqliteBlobStore::open("courier-blobs.db").unwrap();
//!     let engine = SessionSyncEngine::new(store, SyncConfig::default());
//!     let dir = FsSessionDirectory::new("/tmp/auth");
//!
//!     match engine.pull_archive(&dir).await {
//!         Ok(report) => println!("restored {} files", report.files),
//!         Err(e) if e.is_not_found() => println!("no session yet, pair first"),
//!         Err(e) => panic!("cannot restore session: {e}"),
//!     }
//! }
//! ```

pub mod archive;
pub mod engine;
pub mod error;

pub use archive::{build_archive, extract_archive, ArchiveEntry};
pub use engine::{ArchiveReport, PullReport, PushReport, SessionSyncEngine, SyncConfig};
pub use error::{Result, SyncError};
