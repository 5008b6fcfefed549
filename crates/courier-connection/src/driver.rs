//! The single-consumer event loop that owns the connection state.
//!
//! Transport events and manager commands arrive on one channel and are
//! applied one at a time, so a close event can never interleave with a
//! teardown. The loop is the only writer of [`ConnectionState`]; everyone
//! else reads snapshots from a `watch` channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use courier_core::{ConnectionState, DisconnectReason, LifecycleEvent, Recovery};
use courier_store::{BlobStore, SessionDirectory};
use courier_sync::SessionSyncEngine;

use crate::presenter::AuthPresenter;
use crate::transport::{EventSink, Transport, TransportEvent};

/// What the loop last published.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    /// Most recent close reason, kept across later transitions.
    pub last_disconnect: Option<DisconnectReason>,
    /// Current connection attempt. Bumped on every (re)open and teardown.
    pub generation: u64,
}

#[derive(Debug)]
pub(crate) enum ManagerEvent {
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    Control(Control),
}

#[derive(Debug)]
pub(crate) enum Control {
    /// Start a new attempt; replies with its sink, or `None` if the state
    /// does not allow one.
    Begin {
        resp: oneshot::Sender<Option<EventSink>>,
    },
    /// Abandon the current attempt and go back to uninitialized.
    Reset { resp: oneshot::Sender<()> },
    /// Stop acting on closes; events keep being applied.
    BeginShutdown { resp: oneshot::Sender<()> },
    /// Flush pending credentials, terminate, close, and stop the loop.
    Shutdown { resp: oneshot::Sender<()> },
}

/// Collaborators shared by the manager and its loop.
pub(crate) struct Shared<T, B: BlobStore> {
    pub(crate) transport: T,
    pub(crate) sync: SessionSyncEngine<B>,
    pub(crate) session: Arc<dyn SessionDirectory>,
    pub(crate) presenter: Arc<dyn AuthPresenter>,
}

pub(crate) struct Driver<T, B: BlobStore> {
    shared: Arc<Shared<T, B>>,
    rx: mpsc::UnboundedReceiver<ManagerEvent>,
    tx: mpsc::UnboundedSender<ManagerEvent>,
    status: watch::Sender<StatusSnapshot>,
    state: ConnectionState,
    last_disconnect: Option<DisconnectReason>,
    generation: u64,
    /// Credentials changed but the last push of them failed.
    credentials_dirty: bool,
    /// `destroy()` has started; no reopens or pairing prompts.
    shutting_down: bool,
}

impl<T, B> Driver<T, B>
where
    T: Transport,
    B: BlobStore,
{
    pub(crate) fn new(
        shared: Arc<Shared<T, B>>,
        rx: mpsc::UnboundedReceiver<ManagerEvent>,
        tx: mpsc::UnboundedSender<ManagerEvent>,
        status: watch::Sender<StatusSnapshot>,
    ) -> Self {
        Self {
            shared,
            rx,
            tx,
            status,
            state: ConnectionState::Uninitialized,
            last_disconnect: None,
            generation: 0,
            credentials_dirty: false,
            shutting_down: false,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            match event {
                ManagerEvent::Transport { generation, event } => {
                    if generation != self.generation {
                        tracing::debug!(
                            generation,
                            current = self.generation,
                            event = ?event,
                            "dropping event from stale connection attempt"
                        );
                        continue;
                    }
                    self.on_transport_event(event).await;
                }
                ManagerEvent::Control(Control::Begin { resp }) => {
                    let sink = self.begin().await;
                    let _ = resp.send(sink);
                }
                ManagerEvent::Control(Control::Reset { resp }) => {
                    self.generation += 1;
                    self.apply(LifecycleEvent::Reset);
                    let _ = resp.send(());
                }
                ManagerEvent::Control(Control::BeginShutdown { resp }) => {
                    self.shutting_down = true;
                    let _ = resp.send(());
                }
                ManagerEvent::Control(Control::Shutdown { resp }) => {
                    self.shutting_down = true;
                    if self.credentials_dirty {
                        self.push_credentials().await;
                    }
                    self.generation += 1;
                    self.apply(LifecycleEvent::Shutdown);
                    if let Err(e) = self.shared.transport.close().await {
                        tracing::warn!(error = %e, "failed to close transport on shutdown");
                    }
                    let _ = resp.send(());
                    break;
                }
            }
        }
        tracing::debug!("connection event loop stopped");
    }

    /// Start a new attempt from `Uninitialized` or `Disconnected`.
    ///
    /// Any other state means an attempt is already live, and its generation
    /// must not be invalidated.
    async fn begin(&mut self) -> Option<EventSink> {
        let startable = matches!(
            self.state,
            ConnectionState::Uninitialized | ConnectionState::Disconnected(_)
        );
        if self.shutting_down || !startable {
            tracing::debug!(state = %self.state, "refusing to begin a connection attempt");
            return None;
        }
        if self.state == ConnectionState::Disconnected(DisconnectReason::BadSession) {
            self.invalidate_session(DisconnectReason::BadSession).await;
        }
        self.generation += 1;
        self.apply(LifecycleEvent::Begin);
        Some(self.sink())
    }

    fn sink(&self) -> EventSink {
        EventSink::new(self.generation, self.tx.clone())
    }

    fn publish(&self) {
        self.status.send_replace(StatusSnapshot {
            state: self.state.clone(),
            last_disconnect: self.last_disconnect,
            generation: self.generation,
        });
    }

    /// Apply one lifecycle event and publish the result.
    fn apply(&mut self, event: LifecycleEvent) -> Option<Recovery> {
        let transition = self.state.on_event(&event);
        if let (LifecycleEvent::Closed(reason), Some(_)) = (&event, transition.recovery) {
            self.last_disconnect = Some(*reason);
        }
        if transition.next != self.state {
            tracing::info!(
                from = %self.state,
                to = %transition.next,
                generation = self.generation,
                "connection state changed"
            );
        }
        self.state = transition.next;
        self.publish();
        transition.recovery
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PairingCode(code) => {
                self.apply(LifecycleEvent::PairingCode(code.clone()));
                if self.state.is_awaiting_auth() && !self.shutting_down {
                    self.shared.presenter.present(&code);
                }
            }
            TransportEvent::Opened => {
                self.apply(LifecycleEvent::Opened);
            }
            TransportEvent::Closed(reason) => {
                if let DisconnectReason::Transient(code) = reason {
                    tracing::warn!(
                        code,
                        "transient disconnect, waiting for transport to reconnect"
                    );
                } else {
                    tracing::info!(reason = %reason, "connection closed");
                }
                let recovery = self.apply(LifecycleEvent::Closed(reason));
                match recovery {
                    Some(Recovery::ClearSessionAndRepair) if self.shutting_down => {
                        self.invalidate_session(reason).await;
                    }
                    Some(_) if self.shutting_down => {
                        tracing::debug!(reason = %reason, "shutting down, not reconnecting");
                    }
                    Some(recovery) => self.recover(reason, recovery).await,
                    None => {}
                }
            }
            TransportEvent::CredentialsUpdated => {
                self.push_credentials().await;
            }
        }
    }

    async fn recover(&mut self, reason: DisconnectReason, recovery: Recovery) {
        match recovery {
            Recovery::ClearSessionAndRepair => {
                self.invalidate_session(reason).await;
                self.reopen(reason).await;
            }
            Recovery::Reconnect => self.reopen(reason).await,
            Recovery::Passive => {}
            Recovery::Terminate => {
                tracing::error!(
                    reason = %reason,
                    "session taken over by another client, not reconnecting"
                );
                if let Err(e) = self.shared.transport.close().await {
                    tracing::warn!(error = %e, "failed to close transport");
                }
            }
        }
    }

    /// Delete the session locally and remotely so it cannot be reused.
    async fn invalidate_session(&mut self, reason: DisconnectReason) {
        tracing::warn!(reason = %reason, "session invalidated, deleting stored credentials");
        self.credentials_dirty = false;
        if let Err(e) = self.shared.session.clear().await {
            tracing::error!(error = %e, "failed to clear local session directory");
        }
        if let Err(e) = self.shared.sync.delete_archive().await {
            tracing::warn!(error = %e, "failed to delete remote session archive");
        }
    }

    /// Tear down the current connection and open a fresh one.
    async fn reopen(&mut self, reason: DisconnectReason) {
        if let Err(e) = self.shared.transport.close().await {
            tracing::warn!(error = %e, "failed to close transport before reopening");
        }
        self.generation += 1;
        self.publish();

        tracing::info!(reason = %reason, generation = self.generation, "reopening connection");
        let sink = self.sink();
        if let Err(e) = self
            .shared
            .transport
            .open(self.shared.session.clone(), sink)
            .await
        {
            tracing::error!(error = %e, "reopen failed, waiting for next initialize");
            self.state = ConnectionState::Disconnected(reason);
            self.publish();
        }
    }

    async fn push_credentials(&mut self) {
        match self
            .shared
            .sync
            .push_archive(self.shared.session.as_ref())
            .await
        {
            Ok(report) => {
                self.credentials_dirty = false;
                tracing::debug!(files = report.files, "credentials persisted");
            }
            Err(e) => {
                self.credentials_dirty = true;
                tracing::error!(
                    error = %e,
                    "failed to persist rotated credentials, will retry on shutdown"
                );
            }
        }
    }
}
