//! Job configuration.
//!
//! Loaded from JSON. Every field has a default, so an empty object is a
//! valid configuration. Durations are plain integers with their unit in
//! the field name.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_connection::ConnectionConfig;
use courier_sync::SyncConfig;

use crate::error::{CourierError, Result};
use crate::logging::LogFormat;

/// Top-level configuration for a Courier job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Local directory the transport keeps its credentials in.
    pub session_dir: PathBuf,
    /// Local directory of application data synced incrementally, if any.
    pub data_dir: Option<PathBuf>,
    /// SQLite file backing the durable blob store.
    pub blob_db: PathBuf,
    pub sync: SyncSettings,
    pub connection: ConnectionSettings,
    pub log_format: LogFormat,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("auth_info"),
            data_dir: None,
            blob_db: PathBuf::from("courier-blobs.db"),
            sync: SyncSettings::default(),
            connection: ConnectionSettings::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl CourierConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CourierError::Config(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CourierError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            session_namespace: self.sync.session_namespace.clone(),
            archive_name: self.sync.archive_name.clone(),
            data_namespace: self.sync.data_namespace.clone(),
            upload_batch_size: self.sync.upload_batch_size,
            download_batch_size: self.sync.download_batch_size,
            retention: Duration::from_secs(self.sync.retention_days.saturating_mul(24 * 60 * 60)),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            init_timeout: Duration::from_secs(self.connection.init_timeout_secs),
            poll_interval: Duration::from_millis(self.connection.poll_interval_ms),
            shutdown_grace: Duration::from_millis(self.connection.shutdown_grace_ms),
            interactive: self.connection.interactive,
        }
    }
}

/// Serialized form of [`SyncConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub session_namespace: String,
    pub archive_name: String,
    pub data_namespace: String,
    pub upload_batch_size: usize,
    pub download_batch_size: usize,
    pub retention_days: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        Self {
            session_namespace: defaults.session_namespace,
            archive_name: defaults.archive_name,
            data_namespace: defaults.data_namespace,
            upload_batch_size: defaults.upload_batch_size,
            download_batch_size: defaults.download_batch_size,
            retention_days: defaults.retention.as_secs() / (24 * 60 * 60),
        }
    }
}

/// Serialized form of [`ConnectionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub init_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub interactive: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            init_timeout_secs: defaults.init_timeout.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            shutdown_grace_ms: defaults.shutdown_grace.as_millis() as u64,
            interactive: defaults.interactive,
        }
    }
}
