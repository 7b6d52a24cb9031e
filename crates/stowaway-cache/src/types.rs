//! Cache types and options.

use crate::compression::CompressionMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote cache entry returned by lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The key that matched (may be a restore key prefix match).
    pub cache_key: Option<String>,
    /// Opaque transfer handle, usually a download URL.
    pub archive_location: Option<String>,
    /// When the entry was committed.
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
}

/// Identity reported by a save.
///
/// Only success or failure is observable; the value carries no server identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheId(pub i64);

impl CacheId {
    pub const SAVED: CacheId = CacheId(1);
    pub const NOT_SAVED: CacheId = CacheId(-1);

    pub fn is_saved(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal state of a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Archive downloaded and extracted.
    Restored { key: String, exact: bool },
    /// Entry found, nothing transferred.
    LookupOnly { key: String, exact: bool },
    /// No entry matched, or an infrastructure error was swallowed.
    Miss,
}

impl RestoreOutcome {
    /// The key that matched, if any.
    pub fn matched_key(&self) -> Option<&str> {
        match self {
            RestoreOutcome::Restored { key, .. } | RestoreOutcome::LookupOnly { key, .. } => {
                Some(key)
            }
            RestoreOutcome::Miss => None,
        }
    }

    /// True when the primary key matched exactly.
    pub fn is_exact_hit(&self) -> bool {
        matches!(
            self,
            RestoreOutcome::Restored { exact: true, .. }
                | RestoreOutcome::LookupOnly { exact: true, .. }
        )
    }
}

/// How paths travel to and from the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Paths are packed into a single compressed archive.
    #[default]
    Archive,
    /// The remote client transfers the resolved paths directly.
    Sync,
}

/// Options for a restore call.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Stop after lookup and report the matched key.
    pub lookup_only: bool,
    pub mode: TransferMode,
    /// Custom compression program, or `"none"`.
    pub custom_compression: Option<String>,
    pub enable_cross_os_archive: bool,
}

/// Options for a save call.
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub mode: TransferMode,
    /// Custom compression program, or `"none"`.
    pub custom_compression: Option<String>,
    pub enable_cross_os_archive: bool,
}

/// Options passed to [`crate::RemoteCacheClient::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOptions {
    pub compression: CompressionMethod,
    pub enable_cross_os_archive: bool,
}

/// Options passed to [`crate::RemoteCacheClient::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    pub compression: CompressionMethod,
}

/// Options passed to [`crate::RemoteCacheClient::upload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    pub compression: CompressionMethod,
    pub enable_cross_os_archive: bool,
    /// Archive size in bytes, used as the reservation hint.
    pub size_hint: u64,
}
