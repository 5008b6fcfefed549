//! Store traits: the narrow capability interfaces the sync engine consumes.
//!
//! [`BlobStore`] is the durable remote side (a bucket, or SQLite for local
//! runs). [`SessionDirectory`] is the ephemeral local disk the transport
//! reads its credentials from.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::RemoteObject;

use crate::error::Result;

/// Durable key/bytes store.
///
/// Keys are `/`-separated and namespaced by the caller. Implementations must
/// be safe to call concurrently; the sync engine issues up to a batch worth
/// of requests at once.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous object.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;

    /// Fetch an object. `None` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<RemoteObject>>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// List every key starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<B: BlobStore + ?Sized> BlobStore for Arc<B> {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        (**self).put(key, bytes, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteObject>> {
        (**self).get(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }
}

/// A file found while walking a session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Relative, `/`-separated path.
    pub path: String,
    /// Modification time (Unix ms).
    pub modified_ms: i64,
    pub len: u64,
}

/// Local directory the transport keeps its session files in.
///
/// Paths are relative and validated with
/// [`courier_core::normalize_relative_path`]; implementations reject
/// anything that would escape the root.
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Read a file. `None` when it does not exist.
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Write a file, creating intermediate directories.
    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Recursively list every regular file, sorted by path.
    async fn list_files(&self) -> Result<Vec<LocalFile>>;

    /// Remove every file, leaving an empty directory.
    async fn clear(&self) -> Result<()>;
}

#[async_trait]
impl<D: SessionDirectory + ?Sized> SessionDirectory for Arc<D> {
    async fn read_file(&self, path: &str) -> Result<Option<Vec<u8>>> {
        (**self).read_file(path).await
    }

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        (**self).write_file(path, bytes).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn list_files(&self) -> Result<Vec<LocalFile>> {
        (**self).list_files().await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }
}
