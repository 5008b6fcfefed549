//! Sync metadata: the record of what incremental sync has already uploaded.
//!
//! One metadata record exists per namespace. It is read before an
//! incremental push and rewritten once, after every upload in the push has
//! succeeded. A path whose recorded content hash matches the local file is
//! not uploaded again, whatever its modification time says.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::hash::ContentHash;

/// What was uploaded for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub content_hash: ContentHash,
    /// Local modification time at upload (Unix ms).
    pub modified_ms: i64,
}

/// Path -> record map plus the time of the last completed push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default)]
    pub files: BTreeMap<String, FileRecord>,
    /// Unix ms of the last completed push.
    #[serde(default)]
    pub last_sync_ms: Option<i64>,
}

impl SyncMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    /// True when `path` was uploaded with this content.
    pub fn is_current(&self, path: &str, content_hash: &ContentHash) -> bool {
        self.files
            .get(path)
            .is_some_and(|record| &record.content_hash == content_hash)
    }

    pub fn record(&mut self, path: impl Into<String>, record: FileRecord) {
        self.files.insert(path.into(), record);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| CoreError::MetadataEncode(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| CoreError::MetadataDecode(e.to_string()))
    }
}
