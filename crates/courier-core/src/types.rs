//! Strong type definitions shared across Courier crates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};

/// An object held by a blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Content types used for stored objects.
pub mod content_type {
    pub const ZIP: &str = "application/zip";
    pub const JSON: &str = "application/json";
    pub const OCTET_STREAM: &str = "application/octet-stream";

    /// Guess a content type from a file name.
    pub fn for_path(path: &str) -> &'static str {
        match path.rsplit('.').next() {
            Some("json") => JSON,
            Some("zip") => ZIP,
            _ => OCTET_STREAM,
        }
    }
}

/// A logical base path that keys are namespaced under.
///
/// `Namespace::new("data").key("a/b.json")` is `data/a/b.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(base: impl Into<String>) -> Self {
        Self(base.into().trim_matches('/').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used when listing keys under this namespace.
    pub fn prefix(&self) -> String {
        if self.0.is_empty() {
            String::new()
        } else {
            format!("{}/", self.0)
        }
    }

    /// Full key for a relative path.
    pub fn key(&self, relative: &str) -> String {
        let relative = relative.trim_start_matches('/');
        if self.0.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{relative}", self.0)
        }
    }

    /// Strip the namespace prefix from a key.
    ///
    /// Returns `None` if the key lives outside this namespace.
    pub fn relative<'a>(&self, key: &'a str) -> Option<&'a str> {
        if self.0.is_empty() {
            return Some(key);
        }
        key.strip_prefix(&self.prefix()).filter(|rest| !rest.is_empty())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate and normalize a relative path inside a session directory.
///
/// Backslashes become `/`; empty and `.` segments are dropped. Absolute and
/// drive-letter paths and `..` segments are rejected so nothing can escape
/// the directory.
pub fn normalize_relative_path(path: &str) -> Result<String> {
    let unified = path.replace('\\', "/");
    let drive_letter = unified.as_bytes().get(1) == Some(&b':');
    if unified.starts_with('/') || drive_letter {
        return Err(CoreError::InvalidPath(path.to_string()));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(CoreError::InvalidPath(path.to_string())),
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(CoreError::InvalidPath(path.to_string()));
    }
    Ok(segments.join("/"))
}

/// A transport address.
///
/// User addresses are `<digits>@s.whatsapp.net`; group addresses end in
/// `@g.us` and are used as given.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Jid(String);

impl Jid {
    pub const USER_SERVER: &'static str = "s.whatsapp.net";
    pub const GROUP_SERVER: &'static str = "g.us";

    /// Normalize a phone number or address into a `Jid`.
    ///
    /// Anything already containing `@` is kept verbatim. Otherwise every
    /// non-digit is stripped (`+1 (555) 010-2000` becomes `15550102000`).
    pub fn normalize(destination: &str) -> Result<Self> {
        let trimmed = destination.trim();
        if let Some((user, server)) = trimmed.split_once('@') {
            if user.is_empty() || server.is_empty() {
                return Err(CoreError::InvalidDestination(destination.to_string()));
            }
            return Ok(Self(trimmed.to_string()));
        }

        let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(CoreError::InvalidDestination(destination.to_string()));
        }
        Ok(Self(format!("{digits}@{}", Self::USER_SERVER)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_group(&self) -> bool {
        self.0.ends_with(&format!("@{}", Self::GROUP_SERVER))
    }
}

impl fmt::Debug for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Jid({})", self.0)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Confirmation of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub id: String,
    pub from: String,
}

/// A group the connected account belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
}
