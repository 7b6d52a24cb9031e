//! Remote cache client trait and shared helpers.

use crate::compression::CompressionMethod;
use crate::config::CacheConfig;
use crate::http::HttpCacheClient;
use crate::store::FilesystemStore;
use crate::transport::Platform;
use crate::types::{CacheEntry, DownloadOptions, LookupOptions, UploadOptions};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use stowaway_core::{Error, Result};

/// Version component used for sync transfers instead of a compression name.
const SYNC_VERSION_MARKER: &str = "sync";

/// Trait for remote cache stores.
#[async_trait]
pub trait RemoteCacheClient: Send + Sync {
    /// Find the best entry for an ordered key list.
    ///
    /// The primary key must match exactly; restore keys match exactly or by
    /// prefix, first key wins.
    async fn lookup(
        &self,
        keys: &[String],
        paths: &[String],
        options: &LookupOptions,
    ) -> Result<Option<CacheEntry>>;

    /// Find a sync entry by primary key only.
    async fn lookup_sync(&self, primary_key: &str, paths: &[String]) -> Result<Option<CacheEntry>>;

    /// Download an archive to `dest`.
    async fn download(&self, location: &str, dest: &Path, options: &DownloadOptions) -> Result<()>;

    /// Transfer a sync entry's files onto `workspace`.
    async fn download_sync(&self, location: &str, workspace: &Path) -> Result<()>;

    /// Reserve `key` and upload an archive under it.
    ///
    /// Fails with `Error::ReservationConflict` when the key is already claimed.
    async fn upload(
        &self,
        key: &str,
        paths: &[String],
        archive: &Path,
        options: &UploadOptions,
    ) -> Result<()>;

    /// Reserve `key` and transfer the resolved paths directly.
    ///
    /// Fails with `Error::ReservationConflict` when the key is already claimed.
    async fn upload_sync(
        &self,
        key: &str,
        paths: &[String],
        resolved: &[PathBuf],
        workspace: &Path,
    ) -> Result<()>;
}

#[async_trait]
impl<T: RemoteCacheClient + ?Sized> RemoteCacheClient for Box<T> {
    async fn lookup(
        &self,
        keys: &[String],
        paths: &[String],
        options: &LookupOptions,
    ) -> Result<Option<CacheEntry>> {
        (**self).lookup(keys, paths, options).await
    }

    async fn lookup_sync(&self, primary_key: &str, paths: &[String]) -> Result<Option<CacheEntry>> {
        (**self).lookup_sync(primary_key, paths).await
    }

    async fn download(&self, location: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
        (**self).download(location, dest, options).await
    }

    async fn download_sync(&self, location: &str, workspace: &Path) -> Result<()> {
        (**self).download_sync(location, workspace).await
    }

    async fn upload(
        &self,
        key: &str,
        paths: &[String],
        archive: &Path,
        options: &UploadOptions,
    ) -> Result<()> {
        (**self).upload(key, paths, archive, options).await
    }

    async fn upload_sync(
        &self,
        key: &str,
        paths: &[String],
        resolved: &[PathBuf],
        workspace: &Path,
    ) -> Result<()> {
        (**self).upload_sync(key, paths, resolved, workspace).await
    }
}

/// Build the client for the configured cache URL.
///
/// `file://` URLs use a [`FilesystemStore`], anything else the HTTP client.
pub fn connect(config: &CacheConfig) -> Result<Box<dyn RemoteCacheClient>> {
    let url = config
        .cache_url
        .as_deref()
        .ok_or_else(|| Error::Validation("Cache service URL is not configured".into()))?;
    if url.starts_with("file:") {
        Ok(Box::new(FilesystemStore::from_url(url)?))
    } else {
        Ok(Box::new(HttpCacheClient::new(config)?))
    }
}

/// Fingerprint separating entries built from different path sets or codecs.
///
/// `compression` is `None` for sync transfers. Windows archives are kept
/// apart unless cross-OS archives are enabled.
pub fn cache_version(
    paths: &[String],
    compression: Option<&CompressionMethod>,
    enable_cross_os_archive: bool,
) -> String {
    let mut components: Vec<String> = paths.to_vec();
    match compression {
        Some(method) => components.push(method.name()),
        None => components.push(SYNC_VERSION_MARKER.to_string()),
    }
    if Platform::current().is_windows() && !enable_cross_os_archive {
        components.push("windows-only".to_string());
    }

    let mut hasher = Sha256::new();
    hasher.update(components.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// File listing of a sync entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncManifest {
    /// Paths relative to the workspace, `/`-separated.
    pub files: Vec<String>,
}

/// A regular file that a sync transfer will send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFile {
    /// Manifest name of the file.
    pub name: String,
    pub source: PathBuf,
    pub size: u64,
}

/// Walk resolved paths and list every regular file under them.
pub fn collect_sync_files(resolved: &[PathBuf], workspace: &Path) -> Result<Vec<SyncFile>> {
    let mut files = Vec::new();
    for path in resolved {
        let absolute = if path.is_absolute() {
            path.clone()
        } else {
            workspace.join(path)
        };
        walk(&absolute, workspace, &mut files)?;
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files.dedup_by(|a, b| a.name == b.name);
    Ok(files)
}

fn walk(path: &Path, workspace: &Path, files: &mut Vec<SyncFile>) -> Result<()> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_dir() {
        for child in std::fs::read_dir(path)? {
            walk(&child?.path(), workspace, files)?;
        }
    } else if metadata.is_file() {
        files.push(SyncFile {
            name: manifest_name(path, workspace),
            source: path.to_path_buf(),
            size: metadata.len(),
        });
    }
    Ok(())
}

fn manifest_name(path: &Path, workspace: &Path) -> String {
    let relative = path.strip_prefix(workspace).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if relative.is_absolute() {
        format!("/{}", parts.join("/"))
    } else {
        parts.join("/")
    }
}

/// Where a manifest entry lands on restore. `None` for unsafe names.
pub fn sync_target(name: &str, workspace: &Path) -> Option<PathBuf> {
    let relative = Path::new(name.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    if name.starts_with('/') {
        let root = if cfg!(windows) { "\\" } else { "/" };
        Some(Path::new(root).join(relative))
    } else {
        Some(workspace.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_deterministic() {
        let paths = vec!["dist".to_string(), "~/.cargo".to_string()];
        let a = cache_version(&paths, Some(&CompressionMethod::Zstd), false);
        let b = cache_version(&paths, Some(&CompressionMethod::Zstd), false);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_version_depends_on_inputs() {
        let paths = vec!["dist".to_string()];
        let zstd = cache_version(&paths, Some(&CompressionMethod::Zstd), false);
        let gzip = cache_version(&paths, Some(&CompressionMethod::Gzip), false);
        let sync = cache_version(&paths, None, false);
        let other = cache_version(&["build".to_string()], Some(&CompressionMethod::Zstd), false);
        assert_ne!(zstd, gzip);
        assert_ne!(zstd, sync);
        assert_ne!(zstd, other);
    }

    #[test]
    fn test_collect_sync_files() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(ws.path().join("dist/sub")).unwrap();
        std::fs::write(ws.path().join("dist/a.txt"), b"aaa").unwrap();
        std::fs::write(ws.path().join("dist/sub/b.txt"), b"b").unwrap();

        let files = collect_sync_files(
            &[PathBuf::from("dist"), PathBuf::from("dist/a.txt")],
            ws.path(),
        )
        .unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["dist/a.txt", "dist/sub/b.txt"]);
        assert_eq!(files[0].size, 3);
    }

    #[test]
    fn test_connect_selects_backend() {
        let root = tempfile::tempdir().unwrap();
        let url = url::Url::from_directory_path(root.path()).unwrap();
        assert!(connect(&CacheConfig::new(url.as_str())).is_ok());
        assert!(connect(&CacheConfig::new("https://cache.example.com/")).is_ok());
        assert!(connect(&CacheConfig::default()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_sync_target_rejects_traversal() {
        let ws = Path::new("/work");
        assert_eq!(
            sync_target("dist/a.txt", ws),
            Some(PathBuf::from("/work/dist/a.txt"))
        );
        assert_eq!(sync_target("../etc/passwd", ws), None);
        assert_eq!(sync_target("dist/../../x", ws), None);
    }
}
