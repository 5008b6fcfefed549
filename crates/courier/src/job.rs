//! The job context: one connection lifecycle per scheduled run.
//!
//! A [`Courier`] owns a [`ConnectionManager`] plus an optional directory of
//! application data that is synced incrementally around the caller's work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use courier_connection::{
    presenter_for, ConnectionConfig, ConnectionError, ConnectionManager, Transport,
};
use courier_store::{BlobStore, FsSessionDirectory, SessionDirectory, SqliteBlobStore};
use courier_sync::SessionSyncEngine;

use crate::config::CourierConfig;
use crate::error::Result;

/// Wires the components together for a single job run.
pub struct Courier<T: Transport, B: BlobStore> {
    connection: ConnectionManager<T, B>,
    data_dir: Option<Arc<dyn SessionDirectory>>,
    interactive: bool,
    pairing_timeout: Duration,
}

impl<T> Courier<T, SqliteBlobStore>
where
    T: Transport + 'static,
{
    /// Build a job context backed by the SQLite blob store at `config.blob_db`.
    pub fn open(transport: T, config: &CourierConfig) -> Result<Self> {
        let store = SqliteBlobStore::open(&config.blob_db)?;
        Ok(Self::new(transport, store, config))
    }
}

impl<T, B> Courier<T, B>
where
    T: Transport + 'static,
    B: BlobStore + 'static,
{
    /// Build a job context over on-disk directories from `config`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: T, store: B, config: &CourierConfig) -> Self {
        let session: Arc<dyn SessionDirectory> =
            Arc::new(FsSessionDirectory::new(&config.session_dir));
        let data_dir = config
            .data_dir
            .as_ref()
            .map(|path| Arc::new(FsSessionDirectory::new(path)) as Arc<dyn SessionDirectory>);
        let connection_config = config.connection_config();
        let presenter = presenter_for(connection_config.interactive);

        let connection = ConnectionManager::new(
            transport,
            SessionSyncEngine::new(store, config.sync_config()),
            session,
            presenter,
            connection_config.clone(),
        );
        Self::with_parts(connection, data_dir, &connection_config)
    }

    /// Build a job context from an existing manager.
    pub fn with_parts(
        connection: ConnectionManager<T, B>,
        data_dir: Option<Arc<dyn SessionDirectory>>,
        config: &ConnectionConfig,
    ) -> Self {
        Self {
            connection,
            data_dir,
            interactive: config.interactive,
            pairing_timeout: config.init_timeout,
        }
    }

    pub fn connection(&self) -> &ConnectionManager<T, B> {
        &self.connection
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Job scope
    // ─────────────────────────────────────────────────────────────────────────

    /// Connect, run `work`, then always tear the connection down.
    ///
    /// Application data is pulled before `work` and pushed after it. Data
    /// sync failures are logged and do not fail the job; session restore
    /// failures do.
    pub async fn run<'a, F, Fut, R>(&'a self, work: F) -> Result<R>
    where
        F: FnOnce(&'a ConnectionManager<T, B>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let outcome = self.run_connected(work).await;
        self.connection.destroy().await;

        if let Err(e) = &outcome {
            if e.is_operator_action() {
                tracing::error!(error = %e, "job needs operator action");
            } else {
                tracing::error!(error = %e, "job failed");
            }
        }
        outcome
    }

    async fn run_connected<'a, F, Fut, R>(&'a self, work: F) -> Result<R>
    where
        F: FnOnce(&'a ConnectionManager<T, B>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        self.connect().await?;
        self.pull_data().await;
        let result = work(&self.connection).await;
        self.push_data().await;
        result
    }

    /// Initialize the connection, waiting for an operator to pair when
    /// running interactively.
    pub async fn connect(&self) -> Result<()> {
        match self.connection.initialize().await {
            Ok(()) => Ok(()),
            Err(ConnectionError::AuthenticationRequired { pairing_code }) if self.interactive => {
                tracing::info!(
                    pairing_code = %pairing_code,
                    timeout = ?self.pairing_timeout,
                    "waiting for device pairing"
                );
                self.connection.wait_until_ready(self.pairing_timeout).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Download application data changed remotely. Failures are logged.
    pub async fn pull_data(&self) {
        let Some(dir) = &self.data_dir else {
            return;
        };
        match self.connection.sync().pull_incremental(dir.as_ref()).await {
            Ok(report) => tracing::info!(
                downloaded = report.downloaded,
                rejected = report.rejected,
                "pulled application data"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to pull application data"),
        }
    }

    /// Upload application data changed locally. Failures are logged.
    pub async fn push_data(&self) {
        let Some(dir) = &self.data_dir else {
            return;
        };
        match self.connection.sync().push_incremental(dir.as_ref()).await {
            Ok(report) => tracing::info!(
                uploaded = report.uploaded,
                skipped = report.skipped,
                expired = report.expired,
                "pushed application data"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to push application data"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CourierError;
    use courier_connection::transport::memory::{OpenBehavior, ScriptedTransport, CREDENTIALS_FILE};
    use courier_core::ConnectionState;
    use courier_store::{MemoryBlobStore, MemorySessionDirectory};
    use courier_testkit::{fast_config, populate, TestFixture};

    type TestCourier = Courier<Arc<ScriptedTransport>, Arc<MemoryBlobStore>>;

    fn courier(fixture: &TestFixture, data: Option<Arc<MemorySessionDirectory>>) -> TestCourier {
        Courier::with_parts(
            fixture.manager(),
            data.map(|dir| dir as Arc<dyn SessionDirectory>),
            &fast_config(),
        )
    }

    #[tokio::test]
    async fn test_run_sends_and_destroys() {
        let fixture = TestFixture::new();
        fixture.seed_paired_session().await;
        let job = courier(&fixture, None);

        let receipt = job
            .run(|conn| async move {
                let receipt = conn.send_message("+1 555 010 2000", "build finished").await?;
                Ok::<_, CourierError>(receipt)
            })
            .await
            .unwrap();

        assert!(receipt.id.starts_with("3EB0"));
        assert_eq!(fixture.transport.sent().len(), 1);
        assert_eq!(job.connection().state(), ConnectionState::Terminated);
        assert!(!fixture.transport.is_open());
    }

    #[tokio::test]
    async fn test_run_destroys_after_work_error() {
        let fixture = TestFixture::new();
        fixture.seed_paired_session().await;
        let job = courier(&fixture, None);

        let err = job
            .run(|_| async { Err::<(), _>(CourierError::Config("boom".to_string())) })
            .await
            .unwrap_err();

        assert!(matches!(err, CourierError::Config(_)));
        assert_eq!(job.connection().state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn test_unattended_run_needs_operator() {
        let fixture = TestFixture::new();
        let job = courier(&fixture, None);
        let mut ran = false;

        let err = job
            .run(|_| {
                ran = true;
                async { Ok::<_, CourierError>(()) }
            })
            .await
            .unwrap_err();

        assert!(!ran);
        assert!(err.is_operator_action());
        assert_eq!(fixture.presenter.codes().len(), 1);
        assert_eq!(job.connection().state(), ConnectionState::Terminated);
    }

    #[tokio::test]
    async fn test_interactive_run_waits_for_pairing() {
        let fixture = TestFixture::new();
        let config = ConnectionConfig {
            interactive: true,
            ..fast_config()
        };
        let job = Courier::with_parts(fixture.manager_with(config.clone()), None, &config);

        let transport = fixture.transport.clone();
        let operator = tokio::spawn(async move {
            while transport.sink().is_none() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            transport.complete_pairing().await.unwrap();
        });

        job.run(|conn| async move {
            assert!(conn.is_ready());
            Ok::<_, CourierError>(())
        })
        .await
        .unwrap();
        operator.await.unwrap();

        assert!(fixture.session.exists(CREDENTIALS_FILE).await.unwrap());
        assert!(fixture
            .store
            .peek(&job.connection().sync().archive_key())
            .is_some());
    }

    #[tokio::test]
    async fn test_data_is_synced_around_work() {
        let fixture = TestFixture::new();
        fixture.seed_paired_session().await;

        let previous = MemorySessionDirectory::new();
        populate(&previous, &[("calendar/events.json".to_string(), b"[]".to_vec())]).await;
        fixture.engine().push_incremental(&previous).await.unwrap();

        let data = Arc::new(MemorySessionDirectory::new());
        let job = courier(&fixture, Some(data.clone()));

        job.run(|_| {
            let data = data.clone();
            async move {
                assert_eq!(data.read_file("calendar/events.json").await?, Some(b"[]".to_vec()));
                data.write_file("calendar/sent.json", b"[\"reminder\"]").await?;
                Ok::<_, CourierError>(())
            }
        })
        .await
        .unwrap();

        let remote = fixture.engine().load_metadata().await.unwrap();
        assert!(remote.get("calendar/sent.json").is_some());
    }

    #[tokio::test]
    async fn test_data_sync_failure_does_not_fail_job() {
        let fixture = TestFixture::new();
        fixture.seed_paired_session().await;
        fixture.store.fail_puts_under("data/");

        let data = Arc::new(MemorySessionDirectory::new());
        populate(&*data, &[("notes.json".to_string(), b"{}".to_vec())]).await;
        let job = courier(&fixture, Some(data));

        job.run(|_| async { Ok::<_, CourierError>(()) })
            .await
            .unwrap();

        assert!(fixture.engine().load_metadata().await.unwrap().files.is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_propagates() {
        let fixture = TestFixture::with_transport(ScriptedTransport::with_behavior(
            OpenBehavior::Fail("network unreachable".to_string()),
        ));
        fixture.seed_paired_session().await;
        let job = courier(&fixture, None);

        let err = job
            .run(|_| async { Ok::<_, CourierError>(()) })
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
