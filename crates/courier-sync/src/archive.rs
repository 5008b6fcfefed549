//! Zip codec for session archives.
//!
//! A session directory is packed into one deflated zip so it can be stored
//! and restored as a single object. Entry names are validated on the way
//! out; an archive carrying `..` or absolute names is rejected as corrupt.

use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use courier_core::normalize_relative_path;

use crate::error::{Result, SyncError};

/// One file inside a session archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative path, `/`-separated.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Pack entries into a zip archive.
pub fn build_archive(entries: &[ArchiveEntry]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        writer
            .start_file(entry.path.as_str(), options)
            .map_err(|e| SyncError::ArchiveBuild(format!("{}: {e}", entry.path)))?;
        writer
            .write_all(&entry.bytes)
            .map_err(|e| SyncError::ArchiveBuild(format!("{}: {e}", entry.path)))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| SyncError::ArchiveBuild(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Unpack a zip archive. Directory entries are skipped.
pub fn extract_archive(data: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let mut archive =
        ZipArchive::new(Cursor::new(data)).map_err(|e| SyncError::CorruptArchive(e.to_string()))?;
    let mut entries = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| SyncError::CorruptArchive(e.to_string()))?;
        if !file.is_file() {
            continue;
        }

        let path = normalize_relative_path(file.name())
            .map_err(|e| SyncError::CorruptArchive(e.to_string()))?;
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| SyncError::CorruptArchive(format!("{path}: {e}")))?;

        entries.push(ArchiveEntry { path, bytes });
    }

    Ok(entries)
}
