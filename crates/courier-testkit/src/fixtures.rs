//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use courier_connection::transport::memory::{ScriptedTransport, CREDENTIALS_FILE};
use courier_connection::{AuthPresenter, ConnectionConfig, ConnectionManager};
use courier_store::{FsSessionDirectory, MemoryBlobStore, MemorySessionDirectory, SessionDirectory};
use courier_sync::{SessionSyncEngine, SyncConfig};

/// Manager type built by [`TestFixture`].
pub type FixtureManager = ConnectionManager<Arc<ScriptedTransport>, Arc<MemoryBlobStore>>;

/// Presenter that remembers every pairing code it was shown.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    codes: Mutex<Vec<String>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn codes(&self) -> Vec<String> {
        self.codes
            .lock()
            .map(|codes| codes.clone())
            .unwrap_or_default()
    }
}

impl AuthPresenter for RecordingPresenter {
    fn present(&self, pairing_code: &str) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.push(pairing_code.to_string());
        }
    }
}

/// Timeouts short enough for tests.
pub fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        init_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(5),
        shutdown_grace: Duration::from_millis(10),
        interactive: false,
    }
}

/// Files a paired session typically holds.
pub fn paired_session_files() -> Vec<(String, Vec<u8>)> {
    vec![
        (
            CREDENTIALS_FILE.to_string(),
            br#"{"me":{"id":"15550100000@s.whatsapp.net"},"registered":true}"#.to_vec(),
        ),
        (
            "app-state-sync-key-AAAAAOvE.json".to_string(),
            br#"{"keyData":"c2VjcmV0","timestamp":"1700000000000"}"#.to_vec(),
        ),
        (
            "pre-key-1.json".to_string(),
            br#"{"private":"AAAA","public":"BBBB"}"#.to_vec(),
        ),
        (
            "session-15550102000.0.json".to_string(),
            vec![0x5a; 1536],
        ),
    ]
}

/// Write every file into `dir`.
pub async fn populate(dir: &dyn SessionDirectory, files: &[(String, Vec<u8>)]) {
    for (path, bytes) in files {
        dir.write_file(path, bytes)
            .await
            .unwrap_or_else(|e| panic!("failed to write {path}: {e}"));
    }
}

/// Read every file in `dir` into a path-ordered map.
pub async fn read_tree(dir: &dyn SessionDirectory) -> BTreeMap<String, Vec<u8>> {
    let mut tree = BTreeMap::new();
    for file in dir.list_files().await.expect("failed to list directory") {
        let bytes = dir
            .read_file(&file.path)
            .await
            .expect("failed to read file")
            .expect("listed file disappeared");
        tree.insert(file.path, bytes);
    }
    tree
}

/// A session directory on real disk, removed when the guard drops.
pub fn temp_session_dir() -> (TempDir, FsSessionDirectory) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let dir = FsSessionDirectory::new(tmp.path().join("auth_info"));
    (tmp, dir)
}

/// In-memory collaborators for one simulated job run.
pub struct TestFixture {
    pub store: Arc<MemoryBlobStore>,
    pub session: Arc<MemorySessionDirectory>,
    pub transport: Arc<ScriptedTransport>,
    pub presenter: Arc<RecordingPresenter>,
}

impl TestFixture {
    /// Create a fixture with a session-aware transport.
    pub fn new() -> Self {
        Self::with_transport(ScriptedTransport::new())
    }

    pub fn with_transport(transport: ScriptedTransport) -> Self {
        Self {
            store: Arc::new(MemoryBlobStore::new()),
            session: Arc::new(MemorySessionDirectory::new()),
            transport: Arc::new(transport),
            presenter: Arc::new(RecordingPresenter::new()),
        }
    }

    /// A sync engine over this fixture's store.
    pub fn engine(&self) -> SessionSyncEngine<Arc<MemoryBlobStore>> {
        SessionSyncEngine::new(self.store.clone(), SyncConfig::default())
    }

    /// A manager with [`fast_config`].
    pub fn manager(&self) -> FixtureManager {
        self.manager_with(fast_config())
    }

    pub fn manager_with(&self, config: ConnectionConfig) -> FixtureManager {
        ConnectionManager::new(
            self.transport.clone(),
            self.engine(),
            self.session.clone(),
            self.presenter.clone(),
            config,
        )
    }

    /// Store the archive a previous, paired run would have left behind.
    pub async fn seed_paired_session(&self) {
        let previous = MemorySessionDirectory::new();
        populate(&previous, &paired_session_files()).await;
        self.engine()
            .push_archive(&previous)
            .await
            .expect("failed to seed session archive");
        self.store.reset_counters();
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
