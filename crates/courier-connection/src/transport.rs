//! Transport abstraction for the messaging connection.
//!
//! The transport library owns the socket, the handshake and encryption.
//! The manager only drives it: open, close, send, enumerate groups, and
//! listen to the events it reports through an [`EventSink`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use courier_core::{DisconnectReason, GroupInfo, Jid, MessageReceipt};
use courier_store::SessionDirectory;

use crate::driver::ManagerEvent;
use crate::error::Result;

/// Events a transport reports while a connection is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A pairing code must be shown to an operator.
    PairingCode(String),
    /// The connection is open and authenticated.
    Opened,
    /// The connection closed.
    Closed(DisconnectReason),
    /// Credentials in the session directory were rotated.
    CredentialsUpdated,
}

/// Where a transport sends its events.
///
/// Each sink is bound to one connection attempt. Once the manager starts a
/// new attempt, events sent through an older sink are discarded.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<ManagerEvent>) -> Self {
        Self { generation, tx }
    }

    /// The attempt this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false once the manager is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(ManagerEvent::Transport {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Transport trait for driving a messaging connection.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting, loading credentials from `session`.
    ///
    /// Returns once the attempt is underway; progress arrives on `events`.
    async fn open(&self, session: Arc<dyn SessionDirectory>, events: EventSink) -> Result<()>;

    /// End the connection. Closing an already closed transport is a no-op.
    async fn close(&self) -> Result<()>;

    /// Send a text message.
    async fn send_text(&self, to: &Jid, text: &str) -> Result<MessageReceipt>;

    /// Enumerate the groups the account is a member of.
    async fn list_groups(&self) -> Result<Vec<GroupInfo>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn open(&self, session: Arc<dyn SessionDirectory>, events: EventSink) -> Result<()> {
        (**self).open(session, events).await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }

    async fn send_text(&self, to: &Jid, text: &str) -> Result<MessageReceipt> {
        (**self).send_text(to, text).await
    }

    async fn list_groups(&self) -> Result<Vec<GroupInfo>> {
        (**self).list_groups().await
    }
}

/// A scripted in-memory transport for testing.
///
/// Stands in for the messaging library: it reacts to `open` the way a real
/// client would given the session directory's contents, and lets tests
/// inject any event afterwards.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::error::ConnectionError;

    /// File whose presence means the session is paired.
    pub const CREDENTIALS_FILE: &str = "creds.json";

    /// What the transport does when opened.
    #[derive(Debug, Clone)]
    pub enum OpenBehavior {
        /// Open if credentials exist, otherwise ask for pairing.
        SessionAware,
        /// Emit nothing; the attempt never progresses.
        Silent,
        /// Fail the `open` call itself.
        Fail(String),
        /// Emit exactly these events.
        Script(Vec<TransportEvent>),
    }

    /// A message handed to `send_text`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMessage {
        pub to: Jid,
        pub text: String,
    }

    struct Live {
        sink: Option<EventSink>,
        session: Option<Arc<dyn SessionDirectory>>,
    }

    /// In-memory transport driven by a script.
    pub struct ScriptedTransport {
        behavior: Mutex<OpenBehavior>,
        pairing_code: String,
        account: String,
        groups: Mutex<Vec<GroupInfo>>,
        sent: Mutex<Vec<SentMessage>>,
        live: Mutex<Live>,
        open: AtomicBool,
        opens: AtomicUsize,
        closes: AtomicUsize,
    }

    impl ScriptedTransport {
        /// Create a session-aware transport.
        pub fn new() -> Self {
            Self::with_behavior(OpenBehavior::SessionAware)
        }

        pub fn with_behavior(behavior: OpenBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                pairing_code: "2@courier-pairing-ref,noise-key,identity-key".to_string(),
                account: format!("15550100000@{}", Jid::USER_SERVER),
                groups: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                live: Mutex::new(Live {
                    sink: None,
                    session: None,
                }),
                open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }

        /// Change what the next `open` does.
        pub fn set_behavior(&self, behavior: OpenBehavior) {
            *lock(&self.behavior) = behavior;
        }

        pub fn set_groups(&self, groups: Vec<GroupInfo>) {
            *lock(&self.groups) = groups;
        }

        /// The pairing code emitted when no credentials are present.
        pub fn pairing_code(&self) -> &str {
            &self.pairing_code
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        pub fn sent(&self) -> Vec<SentMessage> {
            lock(&self.sent).clone()
        }

        /// The sink handed over by the most recent `open`.
        pub fn sink(&self) -> Option<EventSink> {
            lock(&self.live).sink.clone()
        }

        /// Report an event on the current connection attempt.
        pub fn emit(&self, event: TransportEvent) -> bool {
            match self.sink() {
                Some(sink) => sink.emit(event),
                None => false,
            }
        }

        /// Simulate an operator scanning the pairing code: credentials are
        /// written, reported as updated, and the connection opens.
        pub async fn complete_pairing(&self) -> Result<()> {
            let session = lock(&self.live)
                .session
                .clone()
                .ok_or_else(|| ConnectionError::Transport("transport was never opened".into()))?;
            session
                .write_file(
                    CREDENTIALS_FILE,
                    format!("{{\"me\":{{\"id\":\"{}\"}},\"registered\":true}}", self.account)
                        .as_bytes(),
                )
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            self.emit(TransportEvent::CredentialsUpdated);
            self.emit(TransportEvent::Opened);
            Ok(())
        }

        fn ensure_open(&self) -> Result<()> {
            if self.is_open() {
                Ok(())
            } else {
                Err(ConnectionError::Transport("transport is closed".into()))
            }
        }
    }

    impl Default for ScriptedTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(&self, session: Arc<dyn SessionDirectory>, events: EventSink) -> Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let behavior = lock(&self.behavior).clone();

            if let OpenBehavior::Fail(reason) = &behavior {
                return Err(ConnectionError::Transport(reason.clone()));
            }

            {
                let mut live = lock(&self.live);
                live.sink = Some(events.clone());
                live.session = Some(session.clone());
            }
            self.open.store(true, Ordering::SeqCst);

            match behavior {
                OpenBehavior::SessionAware => {
                    let paired = session
                        .exists(CREDENTIALS_FILE)
                        .await
                        .map_err(|e| ConnectionError::Transport(e.to_string()))?;
                    if paired {
                        events.emit(TransportEvent::Opened);
                    } else {
                        events.emit(TransportEvent::PairingCode(self.pairing_code.clone()));
                    }
                }
                OpenBehavior::Script(script) => {
                    for event in script {
                        events.emit(event);
                    }
                }
                OpenBehavior::Silent | OpenBehavior::Fail(_) => {}
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            if self.open.swap(false, Ordering::SeqCst) {
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn send_text(&self, to: &Jid, text: &str) -> Result<MessageReceipt> {
            self.ensure_open()?;
            let mut sent = lock(&self.sent);
            sent.push(SentMessage {
                to: to.clone(),
                text: text.to_string(),
            });
            Ok(MessageReceipt {
                id: format!("3EB0{:08X}", sent.len()),
                from: self.account.clone(),
            })
        }

        async fn list_groups(&self) -> Result<Vec<GroupInfo>> {
            self.ensure_open()?;
            Ok(lock(&self.groups).clone())
        }
    }
}
