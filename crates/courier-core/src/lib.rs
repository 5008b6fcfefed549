//! # Courier Core
//!
//! Pure types for Courier: the connection lifecycle state machine, disconnect
//! classification, sync metadata, and transport addressing.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`ConnectionState`] - Lifecycle state of the single transport connection
//! - [`DisconnectReason`] - Classified close event, with its [`Recovery`]
//! - [`SyncMetadata`] - Record of what incremental sync already uploaded
//! - [`ContentHash`] - Blake3 content identity for change detection
//! - [`Jid`] - Normalized transport address

pub mod error;
pub mod hash;
pub mod metadata;
pub mod state;
pub mod types;

pub use error::{CoreError, Result};
pub use hash::ContentHash;
pub use metadata::{FileRecord, SyncMetadata};
pub use state::{ConnectionState, DisconnectReason, LifecycleEvent, Recovery, Transition};
pub use types::{
    content_type, normalize_relative_path, GroupInfo, Jid, MessageReceipt, Namespace,
    RemoteObject,
};
