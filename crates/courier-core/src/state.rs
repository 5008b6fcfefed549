//! Connection lifecycle state machine.
//!
//! The transition function here is pure: the connection manager's event loop
//! feeds it one [`LifecycleEvent`] at a time and carries out whatever
//! [`Recovery`] it returns. Keeping the table free of I/O lets every
//! disconnect reason be asserted without a transport.
//!
//! ```text
//! Uninitialized --Begin--------------------> Initializing
//! Initializing  --PairingCode--------------> AwaitingAuth
//! Initializing  --Opened-------------------> Connected
//! AwaitingAuth  --Opened-------------------> Connected
//! *             --Closed(LoggedOut)--------> Initializing   (clear session, re-pair)
//! *             --Closed(DeviceRemoved)----> Initializing   (clear session, re-pair)
//! *             --Closed(RestartRequired)--> Initializing   (reuse session)
//! *             --Closed(BadSession)-------> Disconnected
//! *             --Closed(Transient)--------> Disconnected
//! *             --Closed(Replaced)---------> Terminated
//! Disconnected  --Opened-------------------> Connected      (transport auto-reconnect)
//! *             --Reset--------------------> Uninitialized  (initialize timed out)
//! *             --Shutdown-----------------> Terminated
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Close status codes reported by the messaging transport.
pub mod status {
    /// Session logged out from the primary device (also used for device removal).
    pub const LOGGED_OUT: u16 = 401;
    /// Another client opened the same session.
    pub const CONNECTION_REPLACED: u16 = 440;
    /// Stored session could not be used.
    pub const BAD_SESSION: u16 = 500;
    /// Server asked the client to restart its connection.
    pub const RESTART_REQUIRED: u16 = 515;
    /// Detail string that distinguishes device removal from a plain logout.
    pub const DEVICE_REMOVED_DETAIL: &str = "device_removed";
}

/// Why the transport closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The session was logged out from the primary device.
    LoggedOut,
    /// This linked device was removed from the account.
    DeviceRemoved,
    /// The stored session is unusable.
    BadSession,
    /// Another client took over the session.
    ConnectionReplaced,
    /// The server requested a reconnect with the same session.
    RestartRequired,
    /// Any other close; the transport reconnects on its own.
    Transient(u16),
}

/// Action the manager takes after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Delete the session locally and remotely, then open for fresh pairing.
    ClearSessionAndRepair,
    /// Reopen the connection with the existing session.
    Reconnect,
    /// Do nothing; wait for the transport or the next `initialize()`.
    Passive,
    /// Stop for good; another client owns the session.
    Terminate,
}

impl DisconnectReason {
    /// Classify a transport close into a reason.
    ///
    /// `detail` is the optional close detail the transport attaches; only
    /// `device_removed` alongside a 401 is significant.
    pub fn classify(code: Option<u16>, detail: Option<&str>) -> Self {
        match code {
            Some(status::LOGGED_OUT) if detail == Some(status::DEVICE_REMOVED_DETAIL) => {
                Self::DeviceRemoved
            }
            Some(status::LOGGED_OUT) => Self::LoggedOut,
            Some(status::BAD_SESSION) => Self::BadSession,
            Some(status::CONNECTION_REPLACED) => Self::ConnectionReplaced,
            Some(status::RESTART_REQUIRED) => Self::RestartRequired,
            Some(other) => Self::Transient(other),
            None => Self::Transient(0),
        }
    }

    /// The recovery action for this reason.
    pub fn recovery(&self) -> Recovery {
        match self {
            Self::LoggedOut | Self::DeviceRemoved => Recovery::ClearSessionAndRepair,
            Self::RestartRequired => Recovery::Reconnect,
            Self::BadSession | Self::Transient(_) => Recovery::Passive,
            Self::ConnectionReplaced => Recovery::Terminate,
        }
    }

    /// Whether this reason invalidates the stored credentials.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::LoggedOut | Self::DeviceRemoved)
    }

    /// The state the manager moves to after a close with this reason.
    pub fn next_state(&self) -> ConnectionState {
        match self.recovery() {
            Recovery::ClearSessionAndRepair | Recovery::Reconnect => ConnectionState::Initializing,
            Recovery::Passive => ConnectionState::Disconnected(*self),
            Recovery::Terminate => ConnectionState::Terminated,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => write!(f, "logged out"),
            Self::DeviceRemoved => write!(f, "device removed"),
            Self::BadSession => write!(f, "bad session"),
            Self::ConnectionReplaced => write!(f, "connection replaced"),
            Self::RestartRequired => write!(f, "restart required"),
            Self::Transient(code) => write!(f, "transient ({code})"),
        }
    }
}

/// Lifecycle state of the single transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Initializing,
    /// Waiting for an operator to scan the pairing code.
    AwaitingAuth { pairing_code: String },
    Connected,
    Disconnected(DisconnectReason),
    Terminated,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A connection attempt is starting.
    Begin,
    /// The transport produced a pairing code.
    PairingCode(String),
    /// The transport reports the connection is open.
    Opened,
    /// The transport closed the connection.
    Closed(DisconnectReason),
    /// The attempt was abandoned (timeout) and torn down.
    Reset,
    /// The manager is being destroyed.
    Shutdown,
}

/// Outcome of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: ConnectionState,
    /// Set only when a close event was applied.
    pub recovery: Option<Recovery>,
}

impl Transition {
    fn to(next: ConnectionState) -> Self {
        Self {
            next,
            recovery: None,
        }
    }
}

impl ConnectionState {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::AwaitingAuth { .. } => "awaiting_auth",
            Self::Connected => "connected",
            Self::Disconnected(_) => "disconnected",
            Self::Terminated => "terminated",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_awaiting_auth(&self) -> bool {
        matches!(self, Self::AwaitingAuth { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// The pending pairing code, if any.
    pub fn pairing_code(&self) -> Option<&str> {
        match self {
            Self::AwaitingAuth { pairing_code } => Some(pairing_code),
            _ => None,
        }
    }

    /// Apply one event and return the resulting state.
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn on_event(&self, event: &LifecycleEvent) -> Transition {
        use ConnectionState::*;

        if self.is_terminal() {
            return Transition::to(Terminated);
        }

        match (self, event) {
            (_, LifecycleEvent::Shutdown) => Transition::to(Terminated),
            (_, LifecycleEvent::Reset) => Transition::to(Uninitialized),

            (Uninitialized | Disconnected(_), LifecycleEvent::Begin) => {
                Transition::to(Initializing)
            }
            (_, LifecycleEvent::Begin) => Transition::to(self.clone()),

            // A refreshed code replaces the previous one.
            (
                Initializing | AwaitingAuth { .. } | Disconnected(_),
                LifecycleEvent::PairingCode(code),
            ) => Transition::to(AwaitingAuth {
                pairing_code: code.clone(),
            }),
            (_, LifecycleEvent::PairingCode(_)) => Transition::to(self.clone()),

            (Initializing | AwaitingAuth { .. } | Disconnected(_), LifecycleEvent::Opened) => {
                Transition::to(Connected)
            }
            (_, LifecycleEvent::Opened) => Transition::to(self.clone()),

            // Nothing is open before the first attempt.
            (Uninitialized, LifecycleEvent::Closed(_)) => Transition::to(Uninitialized),
            (_, LifecycleEvent::Closed(reason)) => Transition {
                next: reason.next_state(),
                recovery: Some(reason.recovery()),
            },
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected(reason) => write!(f, "disconnected ({reason})"),
            other => write!(f, "{}", other.name()),
        }
    }
}
