//! # Courier Connection
//!
//! Lifecycle management for the single messaging connection of a job run.
//!
//! ## Overview
//!
//! [`ConnectionManager`] drives an external transport library through the
//! narrow [`Transport`] trait. All transport events and lifecycle commands
//! are applied by one event loop task, which is the only writer of the
//! [`ConnectionState`](courier_core::ConnectionState).
//!
//! ```text
//! Uninitialized --initialize()--> Initializing --pairing code--> AwaitingAuth
//!                                      |                              |
//!                                      +--------- opened -------------+--> Connected
//!
//! Connected --LoggedOut/DeviceRemoved--> clear session --> Initializing (fresh pairing)
//! Connected --RestartRequired----------> Initializing (same session)
//! Connected --BadSession/Transient-----> Disconnected
//! Connected --ConnectionReplaced-------> Terminated
//! any       --destroy()----------------> Terminated
//! ```
//!
//! ## Key Types
//!
//! - [`ConnectionManager`] - initialize / send / lookup / destroy
//! - [`Transport`] - What the manager needs from a messaging library
//! - [`EventSink`] - Where a transport reports pairing codes, opens and closes
//! - [`AuthPresenter`] - Shows pairing codes on a terminal or in the logs
//! - [`ConnectionError`] - Distinct error per condition a job must react to
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use courier_connection::transport::memory::ScriptedTransport;
//! use courier_connection::{presenter_for, ConnectionConfig, ConnectionError, ConnectionManager};
//! use courier_store::{FsSessionDirectory, SqliteBlobStore};
//! use courier_sync::{SessionSyncEngine, SyncConfig};
//!
//! async fn example() -> Result<(), ConnectionError> {
//!     let store = SqliteBlobStore::open("courier-blobs.db").unwrap();
//!     let manager = ConnectionManager::new(
//!         ScriptedTransport::new(),
//!         SessionSyncEngine::new(store, SyncConfig::default()),
//!         Arc::new(FsSessionDirectory::new("/tmp/auth")),
//!         presenter_for(false),
//!         ConnectionConfig::default(),
//!     );
//!
//!     let result = match manager.initialize().await {
//!         Ok(()) => manager.send_message("15550102000", "hello").await.map(|_| ()),
//!         Err(e) => Err(e),
//!     };
//!     manager.destroy().await;
//!     result
//! }
//! ```

pub mod config;
mod driver;
pub mod error;
pub mod manager;
pub mod presenter;
pub mod transport;

pub use config::ConnectionConfig;
pub use driver::StatusSnapshot;
pub use error::{ConnectionError, Result};
pub use manager::{AuthStatus, ConnectionManager};
pub use presenter::{presenter_for, AuthPresenter, LogPresenter, TerminalPresenter};
pub use transport::{EventSink, Transport, TransportEvent};
