//! # Courier
//!
//! Keeps a messaging connection alive across short-lived, stateless job
//! runs by persisting its session in a remote blob store.
//!
//! ## Overview
//!
//! A scheduled job wakes up, restores the session, connects, sends its
//! messages and exits. Between runs nothing survives locally, so Courier:
//!
//! - **Restores** the transport's credential directory from a single zip
//!   archive before connecting, and re-uploads it whenever the transport
//!   reports updated credentials
//! - **Drives** the connection through a small state machine, reacting to
//!   each disconnect reason with the right recovery (reconnect, re-pair,
//!   or terminate)
//! - **Syncs** application data incrementally, uploading only files whose
//!   content hash changed
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier::{Courier, CourierConfig, CourierError};
//! use courier::connection::transport::memory::ScriptedTransport;
//!
//! async fn example() -> courier::Result<()> {
//!     let config = CourierConfig::from_json_file("courier.json")?;
//!     courier::logging::init_tracing(config.log_format)?;
//!
//!     let job = Courier::open(ScriptedTransport::new(), &config)?;
//!     job.run(|conn| async move {
//!         conn.send_message("15550102000", "nightly build passed").await?;
//!         Ok::<_, CourierError>(())
//!     })
//!     .await
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `courier::core` - States, disconnect reasons, sync metadata, addressing
//! - `courier::store` - Blob store and session directory backends
//! - `courier::sync` - Session archive and incremental sync
//! - `courier::connection` - Connection manager, transport, presenters

pub mod config;
pub mod error;
pub mod job;
pub mod logging;

// Re-export component crates
pub use courier_connection as connection;
pub use courier_core as core;
pub use courier_store as store;
pub use courier_sync as sync;

// Re-export main types for convenience
pub use config::{ConnectionSettings, CourierConfig, SyncSettings};
pub use error::{CourierError, Result};
pub use job::Courier;
pub use logging::{init_tracing, LogFormat};

pub use courier_connection::{
    AuthStatus, ConnectionConfig, ConnectionError, ConnectionManager, Transport, TransportEvent,
};
pub use courier_core::{ConnectionState, DisconnectReason, GroupInfo, Jid, MessageReceipt};
pub use courier_store::{BlobStore, FsSessionDirectory, SessionDirectory, SqliteBlobStore};
pub use courier_sync::{SessionSyncEngine, SyncConfig, SyncError};
