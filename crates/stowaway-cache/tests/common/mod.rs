//! Shared test doubles for pipeline tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use stowaway_cache::{
    CacheEntry, DownloadOptions, LookupOptions, RemoteCacheClient, UploadOptions,
};
use stowaway_core::{Error, Result};

/// A call observed by [`MemoryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lookup { keys: Vec<String> },
    LookupSync { key: String },
    Download { location: String, dest: PathBuf },
    DownloadSync { location: String },
    Upload { key: String, archive: PathBuf, size_hint: u64 },
    UploadSync { key: String, resolved: Vec<PathBuf> },
}

/// How the client should fail, if at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Failure {
    #[default]
    None,
    Conflict,
    Network,
}

/// In-memory remote store that records every call.
///
/// Restore keys match stored keys by prefix; the primary key matches exactly.
#[derive(Default)]
pub struct MemoryClient {
    pub entries: Mutex<Vec<(String, Vec<u8>)>>,
    pub calls: Mutex<Vec<Call>>,
    pub lookup_failure: Failure,
    pub download_failure: Failure,
    pub upload_failure: Failure,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: &str, bytes: Vec<u8>) -> Self {
        self.entries
            .lock()
            .unwrap()
            .push((key.to_string(), bytes));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn entry(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, bytes)| bytes.clone())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn find(&self, keys: &[String]) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        for (index, key) in keys.iter().enumerate() {
            if let Some((k, _)) = entries.iter().find(|(k, _)| k == key) {
                return Some(k.clone());
            }
            if index > 0 {
                if let Some((k, _)) = entries.iter().rev().find(|(k, _)| k.starts_with(key.as_str())) {
                    return Some(k.clone());
                }
            }
        }
        None
    }

    fn fail(failure: Failure, key: &str) -> Result<()> {
        match failure {
            Failure::None => Ok(()),
            Failure::Conflict => Err(Error::ReservationConflict {
                key: key.to_string(),
            }),
            Failure::Network => Err(Error::Network("connection reset by peer".into())),
        }
    }
}

#[async_trait]
impl RemoteCacheClient for MemoryClient {
    async fn lookup(
        &self,
        keys: &[String],
        _paths: &[String],
        _options: &LookupOptions,
    ) -> Result<Option<CacheEntry>> {
        self.record(Call::Lookup {
            keys: keys.to_vec(),
        });
        Self::fail(self.lookup_failure, &keys[0])?;
        Ok(self.find(keys).map(|key| CacheEntry {
            archive_location: Some(format!("memory://{}", key)),
            cache_key: Some(key),
            creation_time: None,
        }))
    }

    async fn lookup_sync(&self, primary_key: &str, _paths: &[String]) -> Result<Option<CacheEntry>> {
        self.record(Call::LookupSync {
            key: primary_key.to_string(),
        });
        Self::fail(self.lookup_failure, primary_key)?;
        Ok(self.entry(primary_key).map(|_| CacheEntry {
            cache_key: Some(primary_key.to_string()),
            archive_location: Some(format!("memory://{}", primary_key)),
            creation_time: None,
        }))
    }

    async fn download(&self, location: &str, dest: &Path, _options: &DownloadOptions) -> Result<()> {
        self.record(Call::Download {
            location: location.to_string(),
            dest: dest.to_path_buf(),
        });
        Self::fail(self.download_failure, location)?;
        let key = location.trim_start_matches("memory://");
        let bytes = self
            .entry(key)
            .ok_or_else(|| Error::Network(format!("no blob at {}", location)))?;
        tokio::fs::write(dest, bytes).await?;
        Ok(())
    }

    async fn download_sync(&self, location: &str, _workspace: &Path) -> Result<()> {
        self.record(Call::DownloadSync {
            location: location.to_string(),
        });
        Self::fail(self.download_failure, location)
    }

    async fn upload(
        &self,
        key: &str,
        _paths: &[String],
        archive: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        self.record(Call::Upload {
            key: key.to_string(),
            archive: archive.to_path_buf(),
            size_hint: options.size_hint,
        });
        Self::fail(self.upload_failure, key)?;
        let bytes = tokio::fs::read(archive).await?;
        self.entries
            .lock()
            .unwrap()
            .push((key.to_string(), bytes));
        Ok(())
    }

    async fn upload_sync(
        &self,
        key: &str,
        _paths: &[String],
        resolved: &[PathBuf],
        _workspace: &Path,
    ) -> Result<()> {
        self.record(Call::UploadSync {
            key: key.to_string(),
            resolved: resolved.to_vec(),
        });
        Self::fail(self.upload_failure, key)?;
        self.entries
            .lock()
            .unwrap()
            .push((key.to_string(), Vec::new()));
        Ok(())
    }
}

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,stowaway_cache=debug")),
        )
        .with_test_writer()
        .try_init();
}
