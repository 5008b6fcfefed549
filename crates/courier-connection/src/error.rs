//! Error types for the connection module.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use courier_core::{ConnectionState, CoreError, DisconnectReason};
use courier_sync::SyncError;

/// Errors surfaced by the connection manager.
///
/// Cloneable so concurrent `initialize()` callers can all receive the
/// outcome of the one attempt that actually ran.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The connection did not open or ask for pairing in time.
    #[error("initialization timed out after {0:?}")]
    InitializationTimeout(Duration),

    /// An operator has to link the device with this pairing code.
    #[error("authentication required: scan the pairing code to link this device")]
    AuthenticationRequired { pairing_code: String },

    /// The stored credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The session was invalidated and could not be re-paired.
    #[error("session invalidated: {0}")]
    SessionInvalidated(DisconnectReason),

    /// Another client now owns the session.
    #[error("device replaced: another client took over this session")]
    DeviceReplaced,

    /// The manager was destroyed or terminated.
    #[error("connection manager terminated")]
    Terminated,

    /// The operation needs a connected transport.
    #[error("not ready: connection is {0}")]
    NotReady(ConnectionState),

    /// The transport library failed a request.
    #[error("transport error: {0}")]
    Transport(String),

    /// The session archive exists but could not be restored.
    #[error("session restore failed: {0}")]
    SessionRestore(#[source] Arc<SyncError>),

    /// Destination could not be normalized.
    #[error(transparent)]
    InvalidDestination(#[from] CoreError),
}

impl ConnectionError {
    /// True when nothing will succeed until a human acts.
    pub fn is_operator_action(&self) -> bool {
        matches!(
            self,
            ConnectionError::AuthenticationRequired { .. }
                | ConnectionError::AuthenticationFailed(_)
                | ConnectionError::DeviceReplaced
        )
    }

    /// True when rerunning the job may succeed on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectionError::InitializationTimeout(_)
                | ConnectionError::Transport(_)
                | ConnectionError::NotReady(_)
        )
    }
}

impl From<SyncError> for ConnectionError {
    fn from(e: SyncError) -> Self {
        ConnectionError::SessionRestore(Arc::new(e))
    }
}

/// Result type for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;
