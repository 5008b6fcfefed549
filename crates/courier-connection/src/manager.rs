//! The connection manager.
//!
//! Owns the one transport connection of a job run. Restores the session
//! before connecting, surfaces pairing to an operator, persists rotated
//! credentials, and tears everything down in `destroy()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use courier_core::{ConnectionState, DisconnectReason, GroupInfo, Jid, MessageReceipt};
use courier_store::{BlobStore, SessionDirectory};
use courier_sync::SessionSyncEngine;

use crate::config::ConnectionConfig;
use crate::driver::{Control, Driver, ManagerEvent, Shared, StatusSnapshot};
use crate::error::{ConnectionError, Result};
use crate::presenter::AuthPresenter;
use crate::transport::{EventSink, Transport};

/// Point-in-time view of authentication for callers and operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStatus {
    pub state: ConnectionState,
    pub ready: bool,
    pub requires_auth: bool,
    pub pairing_code: Option<String>,
    pub last_disconnect: Option<DisconnectReason>,
}

/// Manages the lifecycle of a single transport connection.
pub struct ConnectionManager<T: Transport, B: BlobStore> {
    shared: Arc<Shared<T, B>>,
    config: ConnectionConfig,
    tx: mpsc::UnboundedSender<ManagerEvent>,
    status: watch::Receiver<StatusSnapshot>,
    in_progress: AtomicBool,
    last_outcome: Mutex<Option<Result<()>>>,
    destroyed: AtomicBool,
    driver: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn terminated_error(snapshot: &StatusSnapshot) -> ConnectionError {
    if snapshot.last_disconnect == Some(DisconnectReason::ConnectionReplaced) {
        ConnectionError::DeviceReplaced
    } else {
        ConnectionError::Terminated
    }
}

/// The outcome a snapshot represents, or `None` if it is still in motion.
///
/// A pending pairing code ends `initialize()` but not `wait_until_ready()`.
fn settled(snapshot: &StatusSnapshot, pairing_ends_wait: bool) -> Option<Result<()>> {
    match &snapshot.state {
        ConnectionState::Connected => Some(Ok(())),
        ConnectionState::AwaitingAuth { pairing_code } if pairing_ends_wait => {
            Some(Err(ConnectionError::AuthenticationRequired {
                pairing_code: pairing_code.clone(),
            }))
        }
        ConnectionState::Terminated => Some(Err(terminated_error(snapshot))),
        ConnectionState::Disconnected(DisconnectReason::BadSession) => Some(Err(
            ConnectionError::AuthenticationFailed("stored session was rejected".into()),
        )),
        ConnectionState::Disconnected(reason) if reason.invalidates_session() => {
            Some(Err(ConnectionError::SessionInvalidated(*reason)))
        }
        _ => None,
    }
}

/// Outcome of `initialize()` when the state leaves nothing to attempt.
fn already_settled(snapshot: &StatusSnapshot) -> Option<Result<()>> {
    match &snapshot.state {
        ConnectionState::Connected => Some(Ok(())),
        ConnectionState::AwaitingAuth { pairing_code } => {
            Some(Err(ConnectionError::AuthenticationRequired {
                pairing_code: pairing_code.clone(),
            }))
        }
        ConnectionState::Terminated => Some(Err(terminated_error(snapshot))),
        _ => None,
    }
}

async fn wait_for_outcome(
    status: &mut watch::Receiver<StatusSnapshot>,
    pairing_ends_wait: bool,
) -> Result<()> {
    loop {
        let outcome = settled(&status.borrow_and_update(), pairing_ends_wait);
        if let Some(outcome) = outcome {
            return outcome;
        }
        if status.changed().await.is_err() {
            return Err(ConnectionError::Terminated);
        }
    }
}

impl<T, B> ConnectionManager<T, B>
where
    T: Transport + 'static,
    B: BlobStore + 'static,
{
    /// Create a manager and start its event loop.
    ///
    /// Must be called from within a Tokio runtime. Nothing connects until
    /// [`initialize`](Self::initialize).
    pub fn new(
        transport: T,
        sync: SessionSyncEngine<B>,
        session: Arc<dyn SessionDirectory>,
        presenter: Arc<dyn AuthPresenter>,
        config: ConnectionConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            transport,
            sync,
            session,
            presenter,
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(StatusSnapshot::default());
        let driver = Driver::new(shared.clone(), rx, tx.clone(), status_tx);
        let handle = tokio::spawn(driver.run());

        Self {
            shared,
            config,
            tx,
            status,
            in_progress: AtomicBool::new(false),
            last_outcome: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            driver: Mutex::new(Some(handle)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect, restoring the stored session first.
    ///
    /// Resolves once the connection is open, or fails with
    /// [`ConnectionError::AuthenticationRequired`] when an operator must pair
    /// the device. Concurrent callers share a single attempt.
    pub async fn initialize(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Terminated);
        }

        if let Some(outcome) = already_settled(&self.snapshot()) {
            return outcome;
        }

        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("initialization already in flight, waiting for its outcome");
            return self.await_in_flight().await;
        }

        // Another attempt may have finished between the check and the claim.
        let snapshot = self.snapshot();
        if let Some(outcome) = already_settled(&snapshot) {
            self.in_progress.store(false, Ordering::SeqCst);
            return outcome;
        }

        let outcome = self.attempt(snapshot.state).await;
        match &outcome {
            Ok(()) => tracing::info!("connection ready"),
            Err(e) => tracing::warn!(error = %e, "initialization did not complete"),
        }

        *lock(&self.last_outcome) = Some(outcome.clone());
        self.in_progress.store(false, Ordering::SeqCst);
        outcome
    }

    async fn attempt(&self, from: ConnectionState) -> Result<()> {
        let timeout = self.config.init_timeout;
        let mut status = self.status.clone();

        let run = async {
            self.start(&from).await?;
            wait_for_outcome(&mut status, true).await
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(timeout = ?timeout, "initialization timed out, tearing down");
                self.teardown().await;
                Err(ConnectionError::InitializationTimeout(timeout))
            }
        }
    }

    async fn start(&self, from: &ConnectionState) -> Result<()> {
        match from {
            // A recovery reopen is already underway.
            ConnectionState::Initializing => return Ok(()),
            ConnectionState::Uninitialized => self.restore_session().await?,
            _ => {
                if let Err(e) = self.shared.transport.close().await {
                    tracing::warn!(error = %e, "failed to close previous connection");
                }
            }
        }

        let Some(sink) = self.begin().await? else {
            tracing::debug!("connection attempt already underway, waiting for it");
            return Ok(());
        };
        tracing::info!(generation = sink.generation(), "opening connection");
        if let Err(e) = self
            .shared
            .transport
            .open(self.shared.session.clone(), sink)
            .await
        {
            tracing::error!(error = %e, "transport failed to open");
            self.teardown().await;
            return Err(e);
        }
        Ok(())
    }

    async fn restore_session(&self) -> Result<()> {
        match self
            .shared
            .sync
            .pull_archive(self.shared.session.as_ref())
            .await
        {
            Ok(report) => {
                tracing::info!(files = report.files, "session restored from blob store");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                tracing::info!("no stored session, pairing will be required");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot restore session archive");
                Err(e.into())
            }
        }
    }

    async fn begin(&self) -> Result<Option<EventSink>> {
        let (resp, rx) = oneshot::channel();
        self.tx
            .send(ManagerEvent::Control(Control::Begin { resp }))
            .map_err(|_| ConnectionError::Terminated)?;
        rx.await.map_err(|_| ConnectionError::Terminated)
    }

    /// Close whatever was opened and return to `Uninitialized`.
    async fn teardown(&self) {
        if let Err(e) = self.shared.transport.close().await {
            tracing::warn!(error = %e, "failed to close transport during teardown");
        }
        let (resp, rx) = oneshot::channel();
        if self
            .tx
            .send(ManagerEvent::Control(Control::Reset { resp }))
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    async fn await_in_flight(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.init_timeout;
        while self.in_progress.load(Ordering::SeqCst) {
            if Instant::now() >= deadline {
                return Err(ConnectionError::InitializationTimeout(self.config.init_timeout));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        let stored = lock(&self.last_outcome).clone();
        match stored {
            Some(outcome) => outcome,
            None => {
                let snapshot = self.snapshot();
                settled(&snapshot, true)
                    .unwrap_or(Err(ConnectionError::NotReady(snapshot.state)))
            }
        }
    }

    /// Wait until the connection is open, e.g. while an operator pairs.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let mut status = self.status.clone();
        tokio::time::timeout(timeout, wait_for_outcome(&mut status, false))
            .await
            .map_err(|_| ConnectionError::InitializationTimeout(timeout))?
    }

    /// Close the connection and release everything.
    ///
    /// Always waits the configured grace period so the transport can flush
    /// its final credential write. Safe to call at any point, including
    /// before `initialize()` and more than once.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(grace = ?self.config.shutdown_grace, "shutting down connection");
        let (resp, ack) = oneshot::channel();
        if self
            .tx
            .send(ManagerEvent::Control(Control::BeginShutdown { resp }))
            .is_ok()
        {
            let _ = ack.await;
        }
        if let Err(e) = self.shared.transport.close().await {
            tracing::warn!(error = %e, "failed to close transport");
        }
        tokio::time::sleep(self.config.shutdown_grace).await;

        let (resp, ack) = oneshot::channel();
        if self
            .tx
            .send(ManagerEvent::Control(Control::Shutdown { resp }))
            .is_ok()
        {
            let _ = ack.await;
        }

        let handle = lock(&self.driver).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "connection event loop ended abnormally");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    fn snapshot(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().state.is_connected()
    }

    pub fn requires_auth(&self) -> bool {
        self.status.borrow().state.is_awaiting_auth()
    }

    pub fn get_auth_status(&self) -> AuthStatus {
        let snapshot = self.snapshot();
        AuthStatus {
            ready: snapshot.state.is_connected(),
            requires_auth: snapshot.state.is_awaiting_auth(),
            pairing_code: snapshot.state.pairing_code().map(str::to_string),
            last_disconnect: snapshot.last_disconnect,
            state: snapshot.state,
        }
    }

    /// Watch every state change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn sync(&self) -> &SessionSyncEngine<B> {
        &self.shared.sync
    }

    pub fn session(&self) -> &Arc<dyn SessionDirectory> {
        &self.shared.session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messaging
    // ─────────────────────────────────────────────────────────────────────────

    fn require_connected(&self) -> Result<()> {
        let state = self.state();
        if state.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotReady(state))
        }
    }

    /// Send a text message to a phone number or address.
    pub async fn send_message(&self, destination: &str, text: &str) -> Result<MessageReceipt> {
        self.require_connected()?;
        let to = Jid::normalize(destination)?;
        let receipt = self.shared.transport.send_text(&to, text).await?;
        tracing::debug!(to = %to, id = %receipt.id, "message sent");
        Ok(receipt)
    }

    /// Find a group by exact, case-sensitive name. The first match wins.
    pub async fn find_group_by_name(&self, name: &str) -> Result<Option<GroupInfo>> {
        self.require_connected()?;
        let groups = self.shared.transport.list_groups().await?;
        Ok(groups.into_iter().find(|group| group.name == name))
    }
}

impl<T: Transport, B: BlobStore> Drop for ConnectionManager<T, B> {
    fn drop(&mut self) {
        let handle = match self.driver.get_mut() {
            Ok(slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{OpenBehavior, ScriptedTransport, CREDENTIALS_FILE};
    use crate::transport::TransportEvent;
    use courier_store::{MemoryBlobStore, MemorySessionDirectory};
    use courier_sync::SyncConfig;

    #[derive(Default)]
    struct RecordingPresenter {
        codes: Mutex<Vec<String>>,
    }

    impl RecordingPresenter {
        fn codes(&self) -> Vec<String> {
            lock(&self.codes).clone()
        }
    }

    impl AuthPresenter for RecordingPresenter {
        fn present(&self, pairing_code: &str) {
            lock(&self.codes).push(pairing_code.to_string());
        }
    }

    type TestManager = ConnectionManager<Arc<ScriptedTransport>, Arc<MemoryBlobStore>>;

    struct Harness {
        manager: Arc<TestManager>,
        transport: Arc<ScriptedTransport>,
        store: Arc<MemoryBlobStore>,
        dir: Arc<MemorySessionDirectory>,
        presenter: Arc<RecordingPresenter>,
    }

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            init_timeout: Duration::from_millis(300),
            poll_interval: Duration::from_millis(5),
            shutdown_grace: Duration::from_millis(10),
            interactive: false,
        }
    }

    fn harness_with(transport: ScriptedTransport, config: ConnectionConfig) -> Harness {
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryBlobStore::new());
        let dir = Arc::new(MemorySessionDirectory::new());
        let presenter = Arc::new(RecordingPresenter::default());
        let manager = ConnectionManager::new(
            transport.clone(),
            SessionSyncEngine::new(store.clone(), SyncConfig::default()),
            dir.clone(),
            presenter.clone(),
            config,
        );
        Harness {
            manager: Arc::new(manager),
            transport,
            store,
            dir,
            presenter,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedTransport::new(), test_config())
    }

    /// Store a paired session archive, as a previous run would have.
    async fn seed_session(h: &Harness) {
        let previous = MemorySessionDirectory::new();
        previous
            .write_file(CREDENTIALS_FILE, b"{\"registered\":true}")
            .await
            .unwrap();
        previous
            .write_file("app-state-sync-key-AAAA.json", b"{\"keyData\":\"x\"}")
            .await
            .unwrap();
        h.manager.sync().push_archive(&previous).await.unwrap();
        h.store.reset_counters();
    }

    async fn wait_for(
        manager: &TestManager,
        pred: impl Fn(&StatusSnapshot) -> bool,
    ) -> StatusSnapshot {
        let mut rx = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if pred(&snapshot) {
                    return snapshot;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state was not reached")
    }

    async fn connected() -> Harness {
        let h = harness();
        seed_session(&h).await;
        h.manager.initialize().await.unwrap();
        h
    }

    #[tokio::test]
    async fn test_restored_session_connects_without_pairing() {
        let h = connected().await;

        assert!(h.manager.is_ready());
        assert!(!h.manager.requires_auth());
        assert!(h.presenter.codes().is_empty());
        assert!(h.dir.exists(CREDENTIALS_FILE).await.unwrap());
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_first_run_requires_pairing() {
        let h = harness();

        let err = h.manager.initialize().await.unwrap_err();

        match err {
            ConnectionError::AuthenticationRequired { pairing_code } => {
                assert_eq!(pairing_code, h.transport.pairing_code());
            }
            other => panic!("expected AuthenticationRequired, got {other:?}"),
        }
        assert!(h.manager.requires_auth());
        assert_eq!(h.presenter.codes(), vec![h.transport.pairing_code().to_string()]);

        let status = h.manager.get_auth_status();
        assert!(!status.ready);
        assert!(status.requires_auth);
        assert_eq!(status.pairing_code.as_deref(), Some(h.transport.pairing_code()));
    }

    #[tokio::test]
    async fn test_pairing_persists_credentials() {
        let h = harness();
        let _ = h.manager.initialize().await;

        h.transport.complete_pairing().await.unwrap();
        h.manager
            .wait_until_ready(Duration::from_secs(2))
            .await
            .unwrap();

        assert!(h.manager.is_ready());
        assert!(h.store.peek(&h.manager.sync().archive_key()).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_initialize_opens_once() {
        let h = harness();
        seed_session(&h).await;

        let (a, b) = tokio::join!(h.manager.initialize(), h.manager.initialize());

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_initialize_does_not_restart_settled_attempt() {
        let h = harness();
        let callers: Vec<_> = (0..40u64)
            .map(|i| {
                let manager = h.manager.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(i / 2)).await;
                    manager.initialize().await
                })
            })
            .collect();

        for caller in callers {
            let outcome = caller.await.unwrap();
            assert!(matches!(outcome, Err(ConnectionError::AuthenticationRequired { .. })));
        }
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.manager.state().pairing_code(), Some(h.transport.pairing_code()));
    }

    #[tokio::test]
    async fn test_begin_refused_while_attempt_is_live() {
        let h = connected().await;
        let generation = h.manager.subscribe().borrow().generation;

        assert!(h.manager.begin().await.unwrap().is_none());

        let snapshot = h.manager.subscribe().borrow().clone();
        assert_eq!(snapshot.generation, generation);
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert!(h
            .transport
            .emit(TransportEvent::Closed(DisconnectReason::Transient(408))));
        wait_for(&h.manager, |s| {
            s.state == ConnectionState::Disconnected(DisconnectReason::Transient(408))
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_initialize_share_pairing_outcome() {
        let h = harness();
        let m1 = h.manager.clone();
        let m2 = h.manager.clone();

        let (a, b) = tokio::join!(
            tokio::spawn(async move { m1.initialize().await }),
            tokio::spawn(async move { m2.initialize().await }),
        );

        assert!(matches!(a.unwrap(), Err(ConnectionError::AuthenticationRequired { .. })));
        assert!(matches!(b.unwrap(), Err(ConnectionError::AuthenticationRequired { .. })));
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_tears_down() {
        let h = harness_with(
            ScriptedTransport::with_behavior(OpenBehavior::Silent),
            ConnectionConfig {
                init_timeout: Duration::from_millis(50),
                ..test_config()
            },
        );

        let err = h.manager.initialize().await.unwrap_err();

        assert!(matches!(err, ConnectionError::InitializationTimeout(_)));
        assert_eq!(h.manager.state(), ConnectionState::Uninitialized);
        assert!(!h.transport.is_open());
        assert_eq!(h.transport.close_count(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_resets() {
        let h = harness_with(
            ScriptedTransport::with_behavior(OpenBehavior::Fail("socket refused".into())),
            test_config(),
        );

        let err = h.manager.initialize().await.unwrap_err();

        assert!(matches!(err, ConnectionError::Transport(_)));
        assert!(err.is_retryable());
        assert_eq!(h.manager.state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_fatal() {
        let h = harness();
        h.store.insert_raw(
            &h.manager.sync().archive_key(),
            b"not a zip".to_vec(),
            courier_core::content_type::ZIP,
        );

        let err = h.manager.initialize().await.unwrap_err();

        assert!(matches!(err, ConnectionError::SessionRestore(_)));
        assert_eq!(h.transport.open_count(), 0);
        assert_eq!(h.manager.state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_logged_out_clears_session_and_repairs() {
        let h = connected().await;

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::LoggedOut));
        let snapshot = wait_for(&h.manager, |s| s.state.is_awaiting_auth()).await;

        assert_eq!(snapshot.last_disconnect, Some(DisconnectReason::LoggedOut));
        assert!(h.dir.list_files().await.unwrap().is_empty());
        assert!(h.store.peek(&h.manager.sync().archive_key()).is_none());
        assert_eq!(h.presenter.codes().len(), 1);
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test]
    async fn test_device_removed_clears_session_and_repairs() {
        let h = connected().await;

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::DeviceRemoved));
        wait_for(&h.manager, |s| s.state.is_awaiting_auth()).await;

        assert!(!h.dir.exists(CREDENTIALS_FILE).await.unwrap());
    }

    #[tokio::test]
    async fn test_restart_required_reconnects_with_same_session() {
        let h = connected().await;
        let before = h.manager.subscribe().borrow().generation;

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::RestartRequired));
        let snapshot = wait_for(&h.manager, |s| {
            s.generation > before && s.state.is_connected()
        })
        .await;

        assert_eq!(snapshot.last_disconnect, Some(DisconnectReason::RestartRequired));
        assert!(h.dir.exists(CREDENTIALS_FILE).await.unwrap());
        assert!(h.presenter.codes().is_empty());
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test]
    async fn test_connection_replaced_terminates() {
        let h = connected().await;

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::ConnectionReplaced));
        wait_for(&h.manager, |s| s.state.is_terminal()).await;

        assert_eq!(h.transport.open_count(), 1);
        assert!(!h.transport.is_open());
        assert!(matches!(
            h.manager.initialize().await,
            Err(ConnectionError::DeviceReplaced)
        ));
    }

    #[tokio::test]
    async fn test_transient_disconnect_is_absorbed() {
        let h = connected().await;

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::Transient(428)));
        wait_for(&h.manager, |s| {
            s.state == ConnectionState::Disconnected(DisconnectReason::Transient(428))
        })
        .await;
        assert!(!h.manager.is_ready());
        assert_eq!(h.transport.open_count(), 1);

        // The transport reconnected on its own.
        h.transport.emit(TransportEvent::Opened);
        wait_for(&h.manager, |s| s.state.is_connected()).await;
        assert_eq!(h.transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_session_waits_for_next_initialize() {
        let h = connected().await;

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::BadSession));
        wait_for(&h.manager, |s| {
            s.state == ConnectionState::Disconnected(DisconnectReason::BadSession)
        })
        .await;
        assert_eq!(h.transport.open_count(), 1);
        assert!(h.dir.exists(CREDENTIALS_FILE).await.unwrap());

        let err = h.manager.initialize().await.unwrap_err();
        assert!(matches!(err, ConnectionError::AuthenticationRequired { .. }));
        assert!(!h.dir.exists(CREDENTIALS_FILE).await.unwrap());
        assert_eq!(h.transport.open_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_events_are_dropped() {
        let h = connected().await;
        let old_sink = h.transport.sink().unwrap();

        h.transport
            .emit(TransportEvent::Closed(DisconnectReason::LoggedOut));
        wait_for(&h.manager, |s| s.state.is_awaiting_auth()).await;

        assert!(old_sink.emit(TransportEvent::Opened));
        h.transport
            .emit(TransportEvent::PairingCode("2@refreshed".into()));
        wait_for(&h.manager, |s| s.state.pairing_code() == Some("2@refreshed")).await;
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let h = harness();
        let err = h.manager.send_message("15550102000", "hi").await.unwrap_err();
        assert!(matches!(err, ConnectionError::NotReady(ConnectionState::Uninitialized)));
    }

    #[tokio::test]
    async fn test_send_normalizes_destination() {
        let h = connected().await;

        let receipt = h
            .manager
            .send_message("+1 (555) 010-2000", "Happy birthday!")
            .await
            .unwrap();

        assert!(!receipt.id.is_empty());
        let sent = h.transport.sent();
        assert_eq!(sent[0].to.as_str(), "15550102000@s.whatsapp.net");
        assert_eq!(sent[0].text, "Happy birthday!");

        let err = h.manager.send_message("not a number", "x").await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidDestination(_)));
    }

    #[tokio::test]
    async fn test_find_group_by_name() {
        let h = connected().await;
        h.transport.set_groups(vec![
            GroupInfo { id: "1@g.us".into(), name: "Family".into() },
            GroupInfo { id: "2@g.us".into(), name: "family".into() },
            GroupInfo { id: "3@g.us".into(), name: "Family".into() },
        ]);

        let found = h.manager.find_group_by_name("Family").await.unwrap().unwrap();
        assert_eq!(found.id, "1@g.us");
        assert!(h.manager.find_group_by_name("Friends").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_destroy_before_initialize() {
        let h = harness();

        h.manager.destroy().await;
        h.manager.destroy().await;

        assert_eq!(h.manager.state(), ConnectionState::Terminated);
        assert_eq!(h.transport.open_count(), 0);
        assert!(matches!(
            h.manager.initialize().await,
            Err(ConnectionError::Terminated)
        ));
    }

    #[tokio::test]
    async fn test_destroy_closes_connection() {
        let h = connected().await;

        h.manager.destroy().await;

        assert!(!h.transport.is_open());
        assert_eq!(h.manager.state(), ConnectionState::Terminated);
        assert!(matches!(
            h.manager.send_message("15550102000", "x").await,
            Err(ConnectionError::NotReady(ConnectionState::Terminated))
        ));
    }

    #[tokio::test]
    async fn test_close_during_shutdown_grace_does_not_reconnect() {
        let h = harness_with(
            ScriptedTransport::new(),
            ConnectionConfig {
                shutdown_grace: Duration::from_millis(200),
                ..test_config()
            },
        );
        seed_session(&h).await;
        h.manager.initialize().await.unwrap();
        let sink = h.transport.sink().unwrap();

        let manager = h.manager.clone();
        let destroy = tokio::spawn(async move { manager.destroy().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        sink.emit(TransportEvent::Closed(DisconnectReason::RestartRequired));
        destroy.await.unwrap();

        assert!(!h.transport.is_open());
        assert_eq!(h.transport.open_count(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Terminated);
        assert_eq!(
            h.manager.get_auth_status().last_disconnect,
            Some(DisconnectReason::RestartRequired)
        );
    }

    #[tokio::test]
    async fn test_logout_during_shutdown_grace_still_clears_session() {
        let h = harness_with(
            ScriptedTransport::new(),
            ConnectionConfig {
                shutdown_grace: Duration::from_millis(200),
                ..test_config()
            },
        );
        seed_session(&h).await;
        h.manager.initialize().await.unwrap();
        let sink = h.transport.sink().unwrap();

        let manager = h.manager.clone();
        let destroy = tokio::spawn(async move { manager.destroy().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        sink.emit(TransportEvent::Closed(DisconnectReason::LoggedOut));
        destroy.await.unwrap();

        assert_eq!(h.transport.open_count(), 1);
        assert!(h.presenter.codes().is_empty());
        assert!(h.store.peek(&h.manager.sync().archive_key()).is_none());
        assert!(!h.dir.exists(CREDENTIALS_FILE).await.unwrap());
    }

    #[tokio::test]
    async fn test_destroy_flushes_unpersisted_credentials() {
        let h = harness();
        let _ = h.manager.initialize().await;
        h.store.fail_puts_under("session/");

        h.transport.complete_pairing().await.unwrap();
        h.manager
            .wait_until_ready(Duration::from_secs(2))
            .await
            .unwrap();
        assert!(h.store.peek(&h.manager.sync().archive_key()).is_none());

        h.store.clear_failures();
        h.manager.destroy().await;

        assert!(h.store.peek(&h.manager.sync().archive_key()).is_some());
    }
}
