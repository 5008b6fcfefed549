//! In-memory implementations of the store traits.
//!
//! These are primarily for testing. They have the same semantics as the
//! SQLite and filesystem backends but keep everything in memory, and they
//! count requests so tests can assert on what was transferred.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use courier_core::{normalize_relative_path, RemoteObject};

use crate::error::{Result, StoreError};
use crate::now_millis;
use crate::traits::{BlobStore, LocalFile, SessionDirectory};

/// In-memory blob store.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, RemoteObject>>,
    /// Keys starting with any of these prefixes fail on `put`.
    failing_prefixes: RwLock<Vec<String>>,
    puts: AtomicUsize,
    gets: AtomicUsize,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            failing_prefixes: RwLock::new(Vec::new()),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of `get` calls so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.puts.store(0, Ordering::SeqCst);
        self.gets.store(0, Ordering::SeqCst);
    }

    /// Make every `put` under `prefix` fail with a backend error.
    pub fn fail_puts_under(&self, prefix: impl Into<String>) {
        if let Ok(mut prefixes) = self.failing_prefixes.write() {
            prefixes.push(prefix.into());
        }
    }

    /// Stop failing puts.
    pub fn clear_failures(&self) {
        if let Ok(mut prefixes) = self.failing_prefixes.write() {
            prefixes.clear();
        }
    }

    /// Snapshot of all stored keys.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Raw bytes for a key, bypassing the counters.
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .ok()
            .and_then(|objects| objects.get(key).map(|o| o.bytes.clone()))
    }

    /// Store bytes directly, bypassing the counters.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>, content_type: &str) {
        if let Ok(mut objects) = self.objects.write() {
            objects.insert(
                key.to_string(),
                RemoteObject {
                    key: key.to_string(),
                    bytes,
                    content_type: content_type.to_string(),
                },
            );
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let failing = self
            .failing_prefixes
            .read()
            .map_err(|_| StoreError::poisoned("memory blob store"))?
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()));
        if failing {
            return Err(StoreError::Backend(format!("injected failure for {key}")));
        }

        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::poisoned("memory blob store"))?;
        objects.insert(
            key.to_string(),
            RemoteObject {
                key: key.to_string(),
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteObject>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::poisoned("memory blob store"))?;
        Ok(objects.get(key).cloned())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::poisoned("memory blob store"))?;
        Ok(objects.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StoreError::poisoned("memory blob store"))?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StoreError::poisoned("memory blob store"))?;
        objects.remove(key);
        Ok(())
    }
}

struct MemoryFile {
    bytes: Vec<u8>,
    modified_ms: i64,
}

/// In-memory session directory with controllable modification times.
pub struct MemorySessionDirectory {
    files: RwLock<BTreeMap<String, MemoryFile>>,
}

impl MemorySessionDirectory {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
        }
    }

    /// Write a file with an explicit modification time.
    pub fn insert_with_mtime(&self, path: &str, bytes: &[u8], modified_ms: i64) -> Result<()> {
        let path = normalize_relative_path(path)?;
        let mut files = self
            .files
            .write()
            .map_err(|_| StoreError::poisoned("memory session directory"))?;
        files.insert(
            path,
            MemoryFile {
                bytes: bytes.to_vec(),
                modified_ms,
            },
        );
        Ok(())
    }

    /// Override the modification time of an existing file.
    pub fn set_modified(&self, path: &str, modified_ms: i64) -> Result<()> {
        let path = normalize_relative_path(path)?;
        let mut files = self
            .files
            .write()
            .map_err(|_| StoreError::poisoned("memory session directory"))?;
        let file = files
            .get_mut(&path)
            .ok_or_else(|| StoreError::NotFound(path.clone()))?;
        file.modified_ms = modified_ms;
        Ok(())
    }
}

impl Default for MemorySessionDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionDirectory for MemorySessionDirectory {
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let path = normalize_relative_path(path)?;
        let files = self
            .files
            .read()
            .map_err(|_| StoreError::poisoned("memory session directory"))?;
        Ok(files.get(&path).map(|f| f.bytes.clone()))
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.insert_with_mtime(path, bytes, now_millis())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize_relative_path(path)?;
        let files = self
            .files
            .read()
            .map_err(|_| StoreError::poisoned("memory session directory"))?;
        Ok(files.contains_key(&path))
    }

    async fn list_files(&self) -> Result<Vec<LocalFile>> {
        let files = self
            .files
            .read()
            .map_err(|_| StoreError::poisoned("memory session directory"))?;
        Ok(files
            .iter()
            .map(|(path, f)| LocalFile {
                path: path.clone(),
                modified_ms: f.modified_ms,
                len: f.bytes.len() as u64,
            })
            .collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut files = self
            .files
            .write()
            .map_err(|_| StoreError::poisoned("memory session directory"))?;
        files.clear();
        Ok(())
    }
}
