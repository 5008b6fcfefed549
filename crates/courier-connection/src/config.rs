//! Connection manager configuration.

use std::time::Duration;

/// Configuration for connection behavior.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Ceiling for one `initialize()` attempt, and for callers waiting on it.
    pub init_timeout: Duration,
    /// How often callers waiting on an in-flight attempt check for its outcome.
    pub poll_interval: Duration,
    /// Unconditional wait in `destroy()` between closing the transport and
    /// releasing resources.
    pub shutdown_grace: Duration,
    /// Render pairing codes on the terminal instead of logging them.
    pub interactive: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(3),
            interactive: false,
        }
    }
}
