//! Filesystem-backed cache store for local runs and `file://` URLs.

use crate::keys::{matches_prefix, sanitize_key};
use crate::remote::{
    RemoteCacheClient, SyncFile, SyncManifest, cache_version, collect_sync_files, sync_target,
};
use crate::types::{CacheEntry, DownloadOptions, LookupOptions, UploadOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use stowaway_core::{Error, Result};
use tracing::{debug, warn};

const ENTRY_FILE: &str = "entry.json";
const RESERVED_FILE: &str = ".reserved";
const FILES_DIR: &str = "files";
/// Characters of the sanitized key kept in a directory name.
const READABLE_KEY_CHARS: usize = 48;

/// Metadata written next to a committed entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    version: String,
    created_at: DateTime<Utc>,
    /// Archive file name; `None` for sync entries.
    archive: Option<String>,
    size_bytes: u64,
}

/// Cache store kept in a local directory.
///
/// Layout: `<root>/<key dir>/<version>/{entry.json, archive | files/}`, where
/// the key dir is the sanitized key prefix followed by a hash of the raw key.
pub struct FilesystemStore {
    root_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Build a store from a `file://` URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Validation(format!("Invalid cache URL {}: {}", url, e)))?;
        let root = parsed
            .to_file_path()
            .map_err(|_| Error::Validation(format!("Not a file URL: {}", url)))?;
        Ok(Self::new(root))
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn entry_dir(&self, key: &str, version: &str) -> PathBuf {
        self.root_dir.join(key_dir_name(key)).join(version)
    }

    async fn read_entry(&self, dir: &Path) -> Result<Option<StoredEntry>> {
        let path = dir.join(ENTRY_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Newest committed entry whose key starts with `prefix`.
    async fn newest_with_prefix(
        &self,
        prefix: &str,
        version: &str,
    ) -> Result<Option<(PathBuf, StoredEntry)>> {
        if !self.root_dir.exists() {
            return Ok(None);
        }

        let readable_prefix = readable_key(prefix);
        let mut newest: Option<(PathBuf, StoredEntry)> = None;
        let mut read_dir = tokio::fs::read_dir(&self.root_dir).await?;
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let name = dir_entry.file_name().to_string_lossy().to_string();
            if !name.starts_with(&readable_prefix) {
                continue;
            }
            let dir = dir_entry.path().join(version);
            let Some(stored) = self.read_entry(&dir).await? else {
                continue;
            };
            if !matches_prefix(&stored.key, prefix) {
                continue;
            }
            let is_newer = newest
                .as_ref()
                .is_none_or(|(_, current)| stored.created_at > current.created_at);
            if is_newer {
                newest = Some((dir, stored));
            }
        }
        Ok(newest)
    }

    async fn find(&self, keys: &[String], version: &str) -> Result<Option<CacheEntry>> {
        for (index, key) in keys.iter().enumerate() {
            let dir = self.entry_dir(key, version);
            if let Some(stored) = self.read_entry(&dir).await? {
                if stored.key == *key {
                    return Ok(Some(to_cache_entry(&dir, stored)));
                }
            }
            // The primary key only matches exactly.
            if index == 0 {
                continue;
            }
            if let Some((dir, stored)) = self.newest_with_prefix(key, version).await? {
                return Ok(Some(to_cache_entry(&dir, stored)));
            }
        }
        Ok(None)
    }

    /// Claim `key`/`version` for a writer.
    async fn reserve(&self, key: &str, version: &str) -> Result<PathBuf> {
        let dir = self.entry_dir(key, version);
        tokio::fs::create_dir_all(&dir).await?;
        if dir.join(ENTRY_FILE).exists() {
            return Err(Error::ReservationConflict {
                key: key.to_string(),
            });
        }
        let marker = dir.join(RESERVED_FILE);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::ReservationConflict {
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn commit(&self, dir: &Path, entry: &StoredEntry) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(dir.join(ENTRY_FILE), bytes).await?;
        tokio::fs::remove_file(dir.join(RESERVED_FILE)).await?;
        debug!(key = %entry.key, dir = %dir.display(), "Committed cache entry");
        Ok(())
    }

    /// Drop a reservation after a failed write so the key can be saved again.
    async fn release(&self, dir: &Path) {
        let result = if dir.join(ENTRY_FILE).exists() {
            tokio::fs::remove_file(dir.join(RESERVED_FILE)).await
        } else {
            tokio::fs::remove_dir_all(dir).await
        };
        match result {
            Ok(()) => debug!(dir = %dir.display(), "Released reservation"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to release reservation"),
        }
    }

    async fn write_archive_entry(
        &self,
        dir: &Path,
        key: &str,
        version: String,
        archive: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        let file_name = options.compression.archive_file_name();
        let size_bytes = tokio::fs::copy(archive, dir.join(&file_name)).await?;

        let entry = StoredEntry {
            key: key.to_string(),
            version,
            created_at: Utc::now(),
            archive: Some(file_name),
            size_bytes,
        };
        self.commit(dir, &entry).await
    }

    async fn write_sync_entry(
        &self,
        dir: &Path,
        key: &str,
        version: String,
        files: Vec<SyncFile>,
    ) -> Result<()> {
        let data_dir = dir.join(FILES_DIR).join("data");
        let mut size_bytes = 0;
        for file in &files {
            let target = data_dir.join(file.name.trim_start_matches('/'));
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            size_bytes += tokio::fs::copy(&file.source, &target).await?;
        }

        let manifest = SyncManifest {
            files: files.into_iter().map(|f| f.name).collect(),
        };
        tokio::fs::write(
            dir.join(FILES_DIR).join("manifest.json"),
            serde_json::to_vec(&manifest)?,
        )
        .await?;

        let entry = StoredEntry {
            key: key.to_string(),
            version,
            created_at: Utc::now(),
            archive: None,
            size_bytes,
        };
        self.commit(dir, &entry).await
    }
}

fn readable_key(key: &str) -> String {
    sanitize_key(key).chars().take(READABLE_KEY_CHARS).collect()
}

/// Directory name for a key. Keys that sanitize alike still get distinct
/// directories through the hash suffix.
fn key_dir_name(key: &str) -> String {
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}-{}", readable_key(key), &digest[..16])
}

fn to_cache_entry(dir: &Path, stored: StoredEntry) -> CacheEntry {
    let location = match &stored.archive {
        Some(file) => dir.join(file),
        None => dir.join(FILES_DIR),
    };
    CacheEntry {
        cache_key: Some(stored.key),
        archive_location: Some(location.display().to_string()),
        creation_time: Some(stored.created_at),
    }
}

#[async_trait]
impl RemoteCacheClient for FilesystemStore {
    async fn lookup(
        &self,
        keys: &[String],
        paths: &[String],
        options: &LookupOptions,
    ) -> Result<Option<CacheEntry>> {
        let version = cache_version(
            paths,
            Some(&options.compression),
            options.enable_cross_os_archive,
        );
        self.find(keys, &version).await
    }

    async fn lookup_sync(&self, primary_key: &str, paths: &[String]) -> Result<Option<CacheEntry>> {
        let version = cache_version(paths, None, false);
        let dir = self.entry_dir(primary_key, &version);
        match self.read_entry(&dir).await? {
            Some(stored) if stored.key == primary_key => Ok(Some(to_cache_entry(&dir, stored))),
            _ => Ok(None),
        }
    }

    async fn download(&self, location: &str, dest: &Path, _options: &DownloadOptions) -> Result<()> {
        tokio::fs::copy(location, dest).await?;
        Ok(())
    }

    async fn download_sync(&self, location: &str, workspace: &Path) -> Result<()> {
        let files_dir = Path::new(location);
        let manifest: SyncManifest =
            serde_json::from_slice(&tokio::fs::read(files_dir.join("manifest.json")).await?)?;

        for name in &manifest.files {
            let target = sync_target(name, workspace).ok_or_else(|| {
                Error::Archive(format!("Refusing to restore unsafe path {}", name))
            })?;
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(files_dir.join("data").join(name.trim_start_matches('/')), &target)
                .await?;
        }
        Ok(())
    }

    async fn upload(
        &self,
        key: &str,
        paths: &[String],
        archive: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        let version = cache_version(
            paths,
            Some(&options.compression),
            options.enable_cross_os_archive,
        );
        let dir = self.reserve(key, &version).await?;

        let result = self
            .write_archive_entry(&dir, key, version, archive, options)
            .await;
        if result.is_err() {
            self.release(&dir).await;
        }
        result
    }

    async fn upload_sync(
        &self,
        key: &str,
        paths: &[String],
        resolved: &[PathBuf],
        workspace: &Path,
    ) -> Result<()> {
        let version = cache_version(paths, None, false);
        let files = collect_sync_files(resolved, workspace)?;
        let dir = self.reserve(key, &version).await?;

        let result = self.write_sync_entry(&dir, key, version, files).await;
        if result.is_err() {
            self.release(&dir).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionMethod;

    fn lookup_options() -> LookupOptions {
        LookupOptions {
            compression: CompressionMethod::Zstd,
            enable_cross_os_archive: false,
        }
    }

    fn upload_options() -> UploadOptions {
        UploadOptions {
            compression: CompressionMethod::Zstd,
            enable_cross_os_archive: false,
            size_hint: 4,
        }
    }

    async fn seed(store: &FilesystemStore, key: &str, paths: &[String]) {
        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("cache.tzst");
        tokio::fs::write(&archive, key.as_bytes()).await.unwrap();
        store
            .upload(key, paths, &archive, &upload_options())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exact_match_then_prefix() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        let paths = vec!["dist".to_string()];
        seed(&store, "npm-linux-111", &paths).await;

        let keys = vec!["npm-linux-222".to_string(), "npm-linux-".to_string()];
        let entry = store
            .lookup(&keys, &paths, &lookup_options())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.cache_key.as_deref(), Some("npm-linux-111"));

        // Primary key never prefix-matches.
        let keys = vec!["npm-linux-".to_string()];
        assert!(store
            .lookup(&keys, &paths, &lookup_options())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch_misses() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        seed(&store, "build-1", &["dist".to_string()]).await;

        let keys = vec!["build-1".to_string()];
        let other_paths = vec!["target".to_string()];
        assert!(store
            .lookup(&keys, &other_paths, &lookup_options())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_second_upload_conflicts() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        let paths = vec!["dist".to_string()];
        seed(&store, "build-123", &paths).await;

        let scratch = tempfile::tempdir().unwrap();
        let archive = scratch.path().join("cache.tzst");
        tokio::fs::write(&archive, b"again").await.unwrap();
        let err = store
            .upload("build-123", &paths, &archive, &upload_options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReservationConflict { .. }));
    }

    #[tokio::test]
    async fn test_failed_upload_releases_reservation() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        let paths = vec!["dist".to_string()];
        let scratch = tempfile::tempdir().unwrap();

        let missing = scratch.path().join("missing.tzst");
        let err = store
            .upload("build-7", &paths, &missing, &upload_options())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let version = cache_version(&paths, Some(&CompressionMethod::Zstd), false);
        assert!(!store.entry_dir("build-7", &version).join(RESERVED_FILE).exists());

        seed(&store, "build-7", &paths).await;
        let keys = vec!["build-7".to_string()];
        let entry = store
            .lookup(&keys, &paths, &lookup_options())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.cache_key.as_deref(), Some("build-7"));
    }

    #[tokio::test]
    async fn test_keys_that_sanitize_alike_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        let paths = vec!["dist".to_string()];
        seed(&store, "deps/linux", &paths).await;
        seed(&store, "deps_linux", &paths).await;

        for key in ["deps/linux", "deps_linux"] {
            let entry = store
                .lookup(&[key.to_string()], &paths, &lookup_options())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.cache_key.as_deref(), Some(key));
            let location = entry.archive_location.unwrap();
            assert_eq!(std::fs::read(location).unwrap(), key.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_long_keys_fit_in_a_directory_name() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        let paths = vec!["dist".to_string()];
        let key = format!("cargo-{}", "x".repeat(500));
        seed(&store, &key, &paths).await;

        let keys = vec!["other".to_string(), "cargo-xxxx".to_string()];
        let entry = store
            .lookup(&keys, &paths, &lookup_options())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.cache_key.as_deref(), Some(key.as_str()));
    }

    #[tokio::test]
    async fn test_sync_roundtrip() {
        let root = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(root.path());
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("dist/sub")).unwrap();
        std::fs::write(source.path().join("dist/sub/app.js"), b"console.log(1)").unwrap();

        let paths = vec!["dist".to_string()];
        store
            .upload_sync("sync-1", &paths, &[PathBuf::from("dist")], source.path())
            .await
            .unwrap();

        let entry = store.lookup_sync("sync-1", &paths).await.unwrap().unwrap();
        let dest = tempfile::tempdir().unwrap();
        store
            .download_sync(entry.archive_location.as_deref().unwrap(), dest.path())
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dest.path().join("dist/sub/app.js")).unwrap(),
            b"console.log(1)"
        );
    }

    #[test]
    fn test_from_url() {
        let root = tempfile::tempdir().unwrap();
        let url = url::Url::from_directory_path(root.path()).unwrap();
        let store = FilesystemStore::from_url(url.as_str()).unwrap();
        assert_eq!(store.root_dir(), root.path());
        assert!(FilesystemStore::from_url("https://cache.example.com").is_err());
    }
}
