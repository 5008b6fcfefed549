//! Versioned schema for the SQLite blob store.
//!
//! Migrations are applied in order inside one transaction; each entry in
//! [`MIGRATIONS`] moves the schema from version `N - 1` to `N`.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::now_millis;

/// Ordered `(version, sql)` steps.
const MIGRATIONS: &[(u32, &str)] = &[(
    1,
    r#"
    CREATE TABLE objects (
        key TEXT PRIMARY KEY,             -- '/' separated, namespace first
        bytes BLOB NOT NULL,
        content_type TEXT NOT NULL,
        content_hash BLOB NOT NULL,       -- blake3 of bytes, checked on read
        updated_at INTEGER NOT NULL       -- unix ms of the last put
    );
    "#,
)];

/// Schema version this build expects.
pub const CURRENT_VERSION: u32 = 1;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let current = schema_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{current} is newer than supported v{CURRENT_VERSION}"
        )));
    }

    let pending: Vec<_> = MIGRATIONS
        .iter()
        .filter(|(version, _)| *version > current)
        .collect();
    if pending.is_empty() {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, sql) in pending {
        tx.execute_batch(sql)
            .map_err(|e| StoreError::Migration(format!("v{version}: {e}")))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, now_millis()],
        )?;
        tracing::debug!(version, "applied blob store migration");
    }
    tx.commit()?;
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}
