//! Session sync engine.
//!
//! Mirrors a [`SessionDirectory`] to and from a [`BlobStore`] in two modes:
//!
//! - **Archive**: the whole directory as one zip under one key. Used for
//!   session credentials, which must never be restored half-updated.
//! - **Incremental**: one object per file under the data namespace, skipping
//!   files whose content hash matches the stored [`SyncMetadata`].

use std::time::Duration;

use futures::future::join_all;

use courier_core::{
    content_type, normalize_relative_path, ContentHash, FileRecord, Namespace, SyncMetadata,
};
use courier_store::{now_millis, BlobStore, SessionDirectory};

use crate::archive::{build_archive, extract_archive, ArchiveEntry};
use crate::error::{Result, SyncError};

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Namespace the session archive is stored under.
    pub session_namespace: String,
    /// Object name of the session archive inside its namespace.
    pub archive_name: String,
    /// Namespace for incrementally synced application data.
    pub data_namespace: String,
    /// Concurrent uploads per batch.
    pub upload_batch_size: usize,
    /// Concurrent downloads per batch.
    pub download_batch_size: usize,
    /// Files not modified within this window are left out of incremental pushes.
    pub retention: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            session_namespace: "session".to_string(),
            archive_name: "auth-state.zip".to_string(),
            data_namespace: "data".to_string(),
            upload_batch_size: 10,
            download_batch_size: 20,
            retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Result of an archive push or pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    /// Files packed or restored.
    pub files: usize,
    /// Size of the archive object.
    pub bytes: usize,
}

/// Result of an incremental push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Files uploaded because their content changed or was never synced.
    pub uploaded: usize,
    /// Files whose content matched the metadata record.
    pub skipped: usize,
    /// Files older than the retention window, neither uploaded nor recorded.
    pub expired: usize,
}

/// Result of an incremental pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    /// Files written to the local directory.
    pub downloaded: usize,
    /// Remote keys whose path could not be used locally.
    pub rejected: usize,
}

struct Candidate {
    path: String,
    bytes: Vec<u8>,
    record: FileRecord,
}

/// Mirrors session directories to and from a blob store.
pub struct SessionSyncEngine<B: BlobStore> {
    store: B,
    config: SyncConfig,
    session: Namespace,
    data: Namespace,
}

impl<B: BlobStore> SessionSyncEngine<B> {
    /// Create a new engine over `store`.
    pub fn new(store: B, config: SyncConfig) -> Self {
        let session = Namespace::new(config.session_namespace.clone());
        let data = Namespace::new(config.data_namespace.clone());
        Self {
            store,
            config,
            session,
            data,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    /// Key the session archive is stored under.
    pub fn archive_key(&self) -> String {
        self.session.key(&self.config.archive_name)
    }

    /// Key of the incremental sync metadata record.
    ///
    /// Sits beside the data namespace, not inside it, so listing the
    /// namespace never returns it.
    pub fn metadata_key(&self) -> String {
        format!("{}.sync-metadata.json", self.data.as_str())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Archive mode
    // ─────────────────────────────────────────────────────────────────────────

    /// Package the whole directory and upload it under the archive key.
    ///
    /// Always re-uploads. An empty directory is not pushed, so a stored
    /// session is never overwritten by nothing.
    pub async fn push_archive(&self, dir: &dyn SessionDirectory) -> Result<ArchiveReport> {
        let files = dir.list_files().await.map_err(SyncError::Local)?;
        if files.is_empty() {
            tracing::warn!("session directory is empty, archive not pushed");
            return Ok(ArchiveReport::default());
        }

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            // A file rotated away between listing and reading is not part of the snapshot.
            let Some(bytes) = dir.read_file(&file.path).await.map_err(SyncError::Local)? else {
                continue;
            };
            entries.push(ArchiveEntry {
                path: file.path,
                bytes,
            });
        }

        let zipped = build_archive(&entries)?;
        let report = ArchiveReport {
            files: entries.len(),
            bytes: zipped.len(),
        };

        let key = self.archive_key();
        self.store
            .put(&key, zipped, content_type::ZIP)
            .await
            .map_err(SyncError::Remote)?;

        tracing::info!(
            key = %key,
            files = report.files,
            bytes = report.bytes,
            "session archive pushed"
        );
        Ok(report)
    }

    /// Download the archive and replace the directory contents with it.
    ///
    /// Returns [`SyncError::ArchiveNotFound`] when nothing was ever pushed.
    /// The archive is fully extracted before the directory is touched, so a
    /// corrupt archive leaves local files as they were.
    pub async fn pull_archive(&self, dir: &dyn SessionDirectory) -> Result<ArchiveReport> {
        let key = self.archive_key();
        let object = self
            .store
            .get(&key)
            .await
            .map_err(SyncError::Remote)?
            .ok_or_else(|| SyncError::ArchiveNotFound { key: key.clone() })?;

        let entries = extract_archive(&object.bytes)?;

        dir.clear().await.map_err(SyncError::Local)?;
        for entry in &entries {
            dir.write_file(&entry.path, &entry.bytes)
                .await
                .map_err(SyncError::Local)?;
        }

        let report = ArchiveReport {
            files: entries.len(),
            bytes: object.bytes.len(),
        };
        tracing::info!(
            key = %key,
            files = report.files,
            bytes = report.bytes,
            "session archive restored"
        );
        Ok(report)
    }

    /// Remove the stored archive so the next run pairs from scratch.
    pub async fn delete_archive(&self) -> Result<()> {
        let key = self.archive_key();
        self.store.delete(&key).await.map_err(SyncError::Remote)?;
        tracing::info!(key = %key, "session archive deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incremental mode
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the metadata record, or an empty one if none is stored.
    pub async fn load_metadata(&self) -> Result<SyncMetadata> {
        match self
            .store
            .get(&self.metadata_key())
            .await
            .map_err(SyncError::Remote)?
        {
            Some(object) => Ok(SyncMetadata::from_json(&object.bytes)?),
            None => Ok(SyncMetadata::new()),
        }
    }

    /// Upload files whose content changed since the last push.
    ///
    /// Uploads run concurrently within a batch; batches run one after
    /// another. The metadata record is written once, after every upload has
    /// succeeded. If any upload fails the record is left untouched and the
    /// whole push is retried next time.
    pub async fn push_incremental(&self, dir: &dyn SessionDirectory) -> Result<PushReport> {
        let mut metadata = self.load_metadata().await?;
        let now = now_millis();
        let retention_ms = i64::try_from(self.config.retention.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention_ms);

        let mut report = PushReport::default();
        let mut candidates = Vec::new();

        for file in dir.list_files().await.map_err(SyncError::Local)? {
            if file.modified_ms < cutoff {
                report.expired += 1;
                continue;
            }

            let Some(bytes) = dir.read_file(&file.path).await.map_err(SyncError::Local)? else {
                continue;
            };
            let record = FileRecord {
                content_hash: ContentHash::hash(&bytes),
                modified_ms: file.modified_ms,
            };

            if metadata.is_current(&file.path, &record.content_hash) {
                // Touched but unchanged; keep the mtime so expiry follows it.
                metadata.record(file.path, record);
                report.skipped += 1;
                continue;
            }

            candidates.push(Candidate {
                path: file.path,
                bytes,
                record,
            });
        }

        for batch in candidates.chunks(self.config.upload_batch_size.max(1)) {
            let uploads = batch.iter().map(|candidate| {
                let key = self.data.key(&candidate.path);
                async move {
                    self.store
                        .put(
                            &key,
                            candidate.bytes.clone(),
                            content_type::for_path(&candidate.path),
                        )
                        .await
                        .map_err(|e| (key, e))
                }
            });

            let mut first_failure = None;
            for result in join_all(uploads).await {
                if let Err((key, e)) = result {
                    tracing::warn!(key = %key, error = %e, "upload failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
            if let Some(e) = first_failure {
                return Err(SyncError::Remote(e));
            }

            report.uploaded += batch.len();
        }

        for candidate in candidates {
            metadata.record(candidate.path, candidate.record);
        }
        metadata.last_sync_ms = Some(now);

        self.store
            .put(&self.metadata_key(), metadata.to_json()?, content_type::JSON)
            .await
            .map_err(SyncError::Remote)?;

        tracing::info!(
            uploaded = report.uploaded,
            skipped = report.skipped,
            expired = report.expired,
            "incremental push complete"
        );
        Ok(report)
    }

    /// Download every object under the data namespace into `dir`.
    pub async fn pull_incremental(&self, dir: &dyn SessionDirectory) -> Result<PullReport> {
        let keys = self
            .store
            .list(&self.data.prefix())
            .await
            .map_err(SyncError::Remote)?;
        let metadata_key = self.metadata_key();

        let mut report = PullReport::default();
        let mut wanted = Vec::with_capacity(keys.len());
        for key in keys {
            if key == metadata_key {
                continue;
            }
            let path = self
                .data
                .relative(&key)
                .ok_or_else(|| format!("{key} is outside {}", self.data))
                .and_then(|rel| normalize_relative_path(rel).map_err(|e| e.to_string()));
            match path {
                Ok(path) => wanted.push((key, path)),
                Err(reason) => {
                    tracing::warn!(key = %key, reason = %reason, "skipping remote key");
                    report.rejected += 1;
                }
            }
        }

        for batch in wanted.chunks(self.config.download_batch_size.max(1)) {
            let downloads = batch.iter().map(|(key, _)| self.store.get(key));
            let objects = join_all(downloads).await;

            for ((key, path), object) in batch.iter().zip(objects) {
                // Deleted between list and get.
                let Some(object) = object.map_err(SyncError::Remote)? else {
                    tracing::debug!(key = %key, "object vanished during pull");
                    continue;
                };
                dir.write_file(path, &object.bytes)
                    .await
                    .map_err(SyncError::Local)?;
                report.downloaded += 1;
            }
        }

        tracing::info!(
            downloaded = report.downloaded,
            rejected = report.rejected,
            "incremental pull complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use courier_core::RemoteObject;
    use courier_store::{MemoryBlobStore, MemorySessionDirectory};

    use super::*;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    fn engine() -> (Arc<MemoryBlobStore>, SessionSyncEngine<Arc<MemoryBlobStore>>) {
        let store = Arc::new(MemoryBlobStore::new());
        let engine = SessionSyncEngine::new(store.clone(), SyncConfig::default());
        (store, engine)
    }

    /// Records how many puts and gets were running at the same time.
    #[derive(Default)]
    struct ConcurrencyTracker {
        inner: MemoryBlobStore,
        puts: AtomicUsize,
        max_puts: AtomicUsize,
        gets: AtomicUsize,
        max_gets: AtomicUsize,
    }

    impl ConcurrencyTracker {
        async fn track<F: std::future::Future>(
            current: &AtomicUsize,
            max: &AtomicUsize,
            op: F,
        ) -> F::Output {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let out = op.await;
            current.fetch_sub(1, Ordering::SeqCst);
            out
        }
    }

    #[async_trait]
    impl BlobStore for ConcurrencyTracker {
        async fn put(
            &self,
            key: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> courier_store::Result<()> {
            let put = self.inner.put(key, bytes, content_type);
            Self::track(&self.puts, &self.max_puts, put).await
        }

        async fn get(&self, key: &str) -> courier_store::Result<Option<RemoteObject>> {
            Self::track(&self.gets, &self.max_gets, self.inner.get(key)).await
        }

        async fn exists(&self, key: &str) -> courier_store::Result<bool> {
            self.inner.exists(key).await
        }

        async fn list(&self, prefix: &str) -> courier_store::Result<Vec<String>> {
            self.inner.list(prefix).await
        }

        async fn delete(&self, key: &str) -> courier_store::Result<()> {
            self.inner.delete(key).await
        }
    }

    async fn seeded_dir(count: usize) -> MemorySessionDirectory {
        let dir = MemorySessionDirectory::new();
        for i in 0..count {
            dir.write_file(&format!("chats/{i:02}.json"), format!("{{\"n\":{i}}}").as_bytes())
                .await
                .unwrap();
        }
        dir
    }

    #[test]
    fn test_keys() {
        let (_, engine) = engine();
        assert_eq!(engine.archive_key(), "session/auth-state.zip");
        assert_eq!(engine.metadata_key(), "data.sync-metadata.json");
    }

    #[tokio::test]
    async fn test_archive_round_trip() {
        let (store, engine) = engine();
        let source = MemorySessionDirectory::new();
        source.write_file("creds.json", b"{\"me\":\"1\"}").await.unwrap();
        source
            .write_file("keys/session-abc.json", b"{\"k\":[1,2]}")
            .await
            .unwrap();

        let pushed = engine.push_archive(&source).await.unwrap();
        assert_eq!(pushed.files, 2);
        assert_eq!(store.keys(), vec!["session/auth-state.zip"]);

        let target = MemorySessionDirectory::new();
        target.write_file("stale.json", b"old").await.unwrap();
        let pulled = engine.pull_archive(&target).await.unwrap();

        assert_eq!(pulled.files, 2);
        assert!(!target.exists("stale.json").await.unwrap());
        assert_eq!(
            target.read_file("keys/session-abc.json").await.unwrap().unwrap(),
            b"{\"k\":[1,2]}"
        );
    }

    #[tokio::test]
    async fn test_push_archive_always_uploads() {
        let (store, engine) = engine();
        let dir = seeded_dir(1).await;
        engine.push_archive(&dir).await.unwrap();
        engine.push_archive(&dir).await.unwrap();
        assert_eq!(store.put_count(), 2);
    }

    #[tokio::test]
    async fn test_push_archive_skips_empty_directory() {
        let (store, engine) = engine();
        let report = engine
            .push_archive(&MemorySessionDirectory::new())
            .await
            .unwrap();
        assert_eq!(report.files, 0);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_pull_archive_not_found() {
        let (_, engine) = engine();
        let err = engine
            .pull_archive(&MemorySessionDirectory::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_pull_corrupt_archive_keeps_local_files() {
        let (store, engine) = engine();
        store.insert_raw("session/auth-state.zip", b"garbage".to_vec(), content_type::ZIP);

        let dir = seeded_dir(1).await;
        let err = engine.pull_archive(&dir).await.unwrap_err();

        assert!(matches!(err, SyncError::CorruptArchive(_)));
        assert!(!err.is_not_found());
        assert_eq!(dir.list_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_archive() {
        let (store, engine) = engine();
        engine.push_archive(&seeded_dir(1).await).await.unwrap();
        engine.delete_archive().await.unwrap();
        assert!(store.keys().is_empty());
        // Deleting twice is fine.
        engine.delete_archive().await.unwrap();
    }

    #[tokio::test]
    async fn test_incremental_second_push_uploads_nothing() {
        let (_, engine) = engine();
        let dir = seeded_dir(5).await;

        let first = engine.push_incremental(&dir).await.unwrap();
        assert_eq!(first.uploaded, 5);

        let second = engine.push_incremental(&dir).await.unwrap();
        assert_eq!(second.uploaded, 0);
        assert_eq!(second.skipped, 5);
    }

    #[tokio::test]
    async fn test_incremental_uploads_only_changed() {
        let (store, engine) = engine();
        let dir = seeded_dir(25).await;
        engine.push_incremental(&dir).await.unwrap();
        let before = engine.load_metadata().await.unwrap();

        for i in 0..10 {
            dir.write_file(&format!("chats/{i:02}.json"), b"changed").await.unwrap();
        }
        store.reset_counters();

        let report = engine.push_incremental(&dir).await.unwrap();
        assert_eq!(report.uploaded, 10);
        assert_eq!(report.skipped, 15);
        // Ten files plus the metadata record.
        assert_eq!(store.put_count(), 11);

        let after = engine.load_metadata().await.unwrap();
        for i in 0..25 {
            let path = format!("chats/{i:02}.json");
            let changed = before.get(&path) != after.get(&path);
            assert_eq!(changed, i < 10, "{path}");
        }
    }

    #[tokio::test]
    async fn test_touched_file_is_not_reuploaded() {
        let (store, engine) = engine();
        let dir = seeded_dir(2).await;
        engine.push_incremental(&dir).await.unwrap();
        store.reset_counters();

        let touched_at = now_millis() + 5_000;
        dir.set_modified("chats/00.json", touched_at).unwrap();
        let report = engine.push_incremental(&dir).await.unwrap();

        assert_eq!(report.uploaded, 0);
        assert_eq!(report.skipped, 2);
        // Only the metadata record.
        assert_eq!(store.put_count(), 1);

        let metadata = engine.load_metadata().await.unwrap();
        let record = metadata.get("chats/00.json").unwrap();
        assert_eq!(record.modified_ms, touched_at);
        assert_eq!(record.content_hash, ContentHash::hash(b"{\"n\":0}"));
    }

    #[tokio::test]
    async fn test_pulled_files_are_not_reuploaded() {
        let (store, engine) = engine();
        engine.push_incremental(&seeded_dir(4).await).await.unwrap();

        let fresh_host = MemorySessionDirectory::new();
        engine.pull_incremental(&fresh_host).await.unwrap();
        store.reset_counters();

        let report = engine.push_incremental(&fresh_host).await.unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.skipped, 4);
    }

    #[tokio::test]
    async fn test_incremental_excludes_expired_files() {
        let (store, engine) = engine();
        let dir = MemorySessionDirectory::new();
        dir.insert_with_mtime("old.json", b"old", now_millis() - 31 * DAY_MS)
            .unwrap();
        dir.insert_with_mtime("recent.json", b"new", now_millis() - DAY_MS)
            .unwrap();

        let report = engine.push_incremental(&dir).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.expired, 1);
        assert!(store.peek("data/old.json").is_none());

        let metadata = engine.load_metadata().await.unwrap();
        assert!(metadata.get("old.json").is_none());
        assert!(metadata.get("recent.json").is_some());
        assert!(metadata.last_sync_ms.is_some());
    }

    #[tokio::test]
    async fn test_incremental_failure_leaves_metadata() {
        let (store, engine) = engine();
        let dir = seeded_dir(3).await;
        store.fail_puts_under("data/chats/01");

        let err = engine.push_incremental(&dir).await.unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(store.peek(&engine.metadata_key()).is_none());
    }

    #[tokio::test]
    async fn test_incremental_batches() {
        let store = Arc::new(MemoryBlobStore::new());
        let config = SyncConfig {
            upload_batch_size: 4,
            ..SyncConfig::default()
        };
        let engine = SessionSyncEngine::new(store.clone(), config);

        let report = engine.push_incremental(&seeded_dir(9).await).await.unwrap();
        assert_eq!(report.uploaded, 9);
        assert_eq!(store.list("data/").await.unwrap().len(), 9);
    }

    #[tokio::test]
    async fn test_uploads_run_concurrently_within_batch_limit() {
        let store = Arc::new(ConcurrencyTracker::default());
        let engine = SessionSyncEngine::new(store.clone(), SyncConfig::default());

        let report = engine.push_incremental(&seeded_dir(25).await).await.unwrap();

        assert_eq!(report.uploaded, 25);
        let max = store.max_puts.load(Ordering::SeqCst);
        assert!(max > 1, "uploads ran one at a time");
        assert!(max <= 10, "{max} uploads in flight");
    }

    #[tokio::test]
    async fn test_downloads_run_concurrently_within_batch_limit() {
        let store = Arc::new(ConcurrencyTracker::default());
        let engine = SessionSyncEngine::new(store.clone(), SyncConfig::default());
        engine.push_incremental(&seeded_dir(45).await).await.unwrap();

        let report = engine
            .pull_incremental(&MemorySessionDirectory::new())
            .await
            .unwrap();

        assert_eq!(report.downloaded, 45);
        let max = store.max_gets.load(Ordering::SeqCst);
        assert!(max > 1, "downloads ran one at a time");
        assert!(max <= 20, "{max} downloads in flight");
    }

    #[tokio::test]
    async fn test_huge_retention_keeps_everything() {
        let (store, _) = engine();
        let engine = SessionSyncEngine::new(
            store,
            SyncConfig {
                retention: Duration::MAX,
                ..SyncConfig::default()
            },
        );
        let dir = MemorySessionDirectory::new();
        dir.insert_with_mtime("ancient.json", b"{}", 0).unwrap();

        let report = engine.push_incremental(&dir).await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.expired, 0);
    }

    #[tokio::test]
    async fn test_pull_incremental() {
        let (store, engine) = engine();
        engine.push_incremental(&seeded_dir(23).await).await.unwrap();
        store.insert_raw("data/../escape.json", b"x".to_vec(), content_type::JSON);

        let target = MemorySessionDirectory::new();
        let report = engine.pull_incremental(&target).await.unwrap();

        assert_eq!(report.downloaded, 23);
        assert_eq!(report.rejected, 1);
        assert_eq!(
            target.read_file("chats/07.json").await.unwrap().unwrap(),
            b"{\"n\":7}"
        );
        assert!(!target.exists(".sync-metadata.json").await.unwrap());
    }
}
