//! SQLite implementation of the BlobStore trait.
//!
//! A durable blob store for runs that have a persistent volume but no object
//! storage. It uses rusqlite with bundled SQLite, wrapped in async via
//! tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use courier_core::{ContentHash, RemoteObject};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::now_millis;
use crate::traits::BlobStore;

/// Blob store in a single SQLite file.
///
/// Each call runs on the blocking pool against one shared connection.
pub struct SqliteBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBlobStore {
    /// Open or create the database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    /// A throwaway database for tests.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::poisoned("sqlite connection"))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("blocking task failed: {e}")))?
    }
}

/// Escape LIKE wildcards so a key prefix matches literally.
fn like_prefix(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl BlobStore for SqliteBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let key = key.to_string();
        let content_type = content_type.to_string();

        self.blocking(move |conn| {
            let hash = ContentHash::hash(&bytes);
            conn.execute(
                "INSERT INTO objects (key, bytes, content_type, content_hash, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                    bytes = excluded.bytes,
                    content_type = excluded.content_type,
                    content_hash = excluded.content_hash,
                    updated_at = excluded.updated_at",
                params![
                    key,
                    bytes,
                    content_type,
                    hash.0.as_slice(),
                    now_millis()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<RemoteObject>> {
        let key = key.to_string();

        self.blocking(move |conn| {
            let row: Option<(Vec<u8>, String, Vec<u8>)> = conn
                .query_row(
                    "SELECT bytes, content_type, content_hash FROM objects WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((bytes, content_type, stored_hash)) = row else {
                return Ok(None);
            };

            // Catch on-disk corruption before it reaches archive extraction.
            if ContentHash::hash(&bytes).as_bytes().as_slice() != stored_hash.as_slice() {
                return Err(StoreError::InvalidData(format!(
                    "content hash mismatch for {key}"
                )));
            }

            Ok(Some(RemoteObject {
                key,
                bytes,
                content_type,
            }))
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = key.to_string();

        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM objects WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = like_prefix(prefix);

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM objects WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![pattern], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();

        self.blocking(move |conn| {
            conn.execute("DELETE FROM objects WHERE key = ?1", params![key])?;
            Ok(())
        })
        .await
    }
}
