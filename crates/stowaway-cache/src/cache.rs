//! Save and restore pipelines.
//!
//! Both pipelines validate caller input first and let validation errors
//! through. Every later failure degrades to "cache not used": a restore
//! reports [`RestoreOutcome::Miss`] and a save reports [`CacheId::NOT_SAVED`].
//! The local archive is removed before either pipeline returns.

use crate::archiver;
use crate::compression::CompressionMethod;
use crate::config::CacheConfig;
use crate::keys::{KeyList, validate_key, validate_paths};
use crate::paths::{GlobResolver, PathResolver};
use crate::remote::RemoteCacheClient;
use crate::transport::{ArchiveTransport, Platform};
use crate::types::{
    CacheId, DownloadOptions, LookupOptions, RestoreOptions, RestoreOutcome, SaveOptions,
    TransferMode, UploadOptions,
};
use std::path::{Path, PathBuf};
use stowaway_core::{Error, FailureClass, Result};
use tempfile::TempDir;
use tracing::{Level, debug, info, warn};

/// Drives save and restore against a remote cache client.
pub struct CacheManager<C: RemoteCacheClient> {
    client: C,
    resolver: Box<dyn PathResolver>,
    config: CacheConfig,
    platform: Platform,
}

impl<C: RemoteCacheClient> CacheManager<C> {
    pub fn new(client: C, config: CacheConfig) -> Self {
        let resolver = GlobResolver::new(config.workspace_root());
        Self {
            client,
            resolver: Box::new(resolver),
            config,
            platform: Platform::current(),
        }
    }

    /// Replace the path resolver.
    pub fn with_resolver(mut self, resolver: impl PathResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Override platform detection.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Restore the best matching cache entry onto the workspace.
    ///
    /// Fails only on invalid input. Any other failure is logged and reported
    /// as a miss.
    pub async fn restore(
        &self,
        paths: &[String],
        primary_key: &str,
        restore_keys: &[String],
        options: &RestoreOptions,
    ) -> Result<RestoreOutcome> {
        validate_paths(paths)?;
        let keys = KeyList::new(primary_key, restore_keys)?;
        let method =
            CompressionMethod::resolve(self.config.codec, options.custom_compression.as_deref());

        match self.restore_entry(paths, &keys, &method, options).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to restore cache");
                Ok(RestoreOutcome::Miss)
            }
        }
    }

    /// Archive the paths and upload them under `key`.
    ///
    /// Fails on invalid input or when nothing matches the paths. Reservation
    /// conflicts and infrastructure failures return [`CacheId::NOT_SAVED`].
    pub async fn save(&self, paths: &[String], key: &str, options: &SaveOptions) -> Result<CacheId> {
        validate_paths(paths)?;
        validate_key(key)?;

        let resolved = self.resolver.resolve(paths)?;
        if resolved.is_empty() {
            return Err(Error::NothingToSave(
                "Path(s) specified for caching do not exist, hence no cache is being saved".into(),
            ));
        }
        debug!(paths = ?resolved, "Cache paths resolved");

        let method =
            CompressionMethod::resolve(self.config.codec, options.custom_compression.as_deref());

        match self.save_entry(paths, &resolved, key, &method, options).await {
            Ok(()) => Ok(CacheId::SAVED),
            Err(e) => match e.class() {
                FailureClass::Validation => Err(e),
                FailureClass::ReservationConflict => {
                    info!(key, error = %e, "Cache save skipped");
                    Ok(CacheId::NOT_SAVED)
                }
                FailureClass::Infrastructure => {
                    warn!(key, error = %e, "Failed to save cache");
                    Ok(CacheId::NOT_SAVED)
                }
            },
        }
    }

    async fn restore_entry(
        &self,
        paths: &[String],
        keys: &KeyList,
        method: &CompressionMethod,
        options: &RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let entry = match options.mode {
            TransferMode::Archive => {
                let lookup = LookupOptions {
                    compression: method.clone(),
                    enable_cross_os_archive: options.enable_cross_os_archive,
                };
                self.client.lookup(keys.as_slice(), paths, &lookup).await?
            }
            TransferMode::Sync => self.client.lookup_sync(keys.primary(), paths).await?,
        };

        let Some((matched, location)) = entry.and_then(|entry| {
            let location = entry.archive_location?;
            let matched = entry.cache_key.unwrap_or_else(|| keys.primary().to_string());
            Some((matched, location))
        }) else {
            info!(keys = %keys.as_slice().join(", "), "Cache not found for input keys");
            return Ok(RestoreOutcome::Miss);
        };
        let exact = keys.is_exact_match(&matched);

        if options.lookup_only {
            info!(key = %matched, "Cache found, lookup only so skipping download");
            return Ok(RestoreOutcome::LookupOnly { key: matched, exact });
        }

        let workspace = self.config.workspace_root();
        match options.mode {
            TransferMode::Sync => {
                self.client.download_sync(&location, &workspace).await?;
            }
            TransferMode::Archive => {
                let scratch = self.scratch_dir()?;
                let archive_path = scratch.path().join(method.archive_file_name());
                let result = self
                    .download_and_extract(&location, &archive_path, &workspace, method)
                    .await;
                remove_archive(&archive_path).await;
                result?;
            }
        }

        info!(key = %matched, "Cache restored from key");
        Ok(RestoreOutcome::Restored { key: matched, exact })
    }

    async fn download_and_extract(
        &self,
        location: &str,
        archive_path: &Path,
        workspace: &Path,
        method: &CompressionMethod,
    ) -> Result<()> {
        let download = DownloadOptions {
            compression: method.clone(),
        };
        self.client
            .download(location, archive_path, &download)
            .await?;

        let size = tokio::fs::metadata(archive_path).await?.len();
        info!(size, "Cache Size: ~{} MB", size / (1024 * 1024));
        log_archive_entries(archive_path, method).await;

        let transport = self.transport(method);
        transport.extract(archive_path, workspace, method).await
    }

    async fn save_entry(
        &self,
        paths: &[String],
        resolved: &[PathBuf],
        key: &str,
        method: &CompressionMethod,
        options: &SaveOptions,
    ) -> Result<()> {
        let workspace = self.config.workspace_root();
        match options.mode {
            TransferMode::Sync => {
                self.client
                    .upload_sync(key, paths, resolved, &workspace)
                    .await
            }
            TransferMode::Archive => {
                let scratch = self.scratch_dir()?;
                let archive_path = scratch.path().join(method.archive_file_name());
                let result = self
                    .archive_and_upload(&scratch, paths, resolved, &workspace, key, method, options)
                    .await;
                remove_archive(&archive_path).await;
                result
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn archive_and_upload(
        &self,
        scratch: &TempDir,
        paths: &[String],
        resolved: &[PathBuf],
        workspace: &Path,
        key: &str,
        method: &CompressionMethod,
        options: &SaveOptions,
    ) -> Result<()> {
        let transport = self.transport(method);
        let archive_path = transport
            .create(scratch.path(), resolved, workspace, method)
            .await?;
        log_archive_entries(&archive_path, method).await;

        let size = tokio::fs::metadata(&archive_path).await?.len();
        info!(size, "Cache Size: ~{} MB", size / (1024 * 1024));
        if size > self.config.max_archive_size {
            return Err(Error::ArchiveTooLarge {
                size,
                limit: self.config.max_archive_size,
            });
        }

        let upload = UploadOptions {
            compression: method.clone(),
            enable_cross_os_archive: options.enable_cross_os_archive,
            size_hint: size,
        };
        self.client.upload(key, paths, &archive_path, &upload).await?;
        info!(key, "Cache saved");
        Ok(())
    }

    fn transport(&self, method: &CompressionMethod) -> ArchiveTransport {
        ArchiveTransport::select(self.platform, method, &self.config.windows_archiver)
    }

    fn scratch_dir(&self) -> Result<TempDir> {
        let root = self.config.temp_root();
        std::fs::create_dir_all(&root)?;
        Ok(tempfile::Builder::new()
            .prefix("stowaway-")
            .tempdir_in(root)?)
    }
}

async fn remove_archive(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed archive"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete archive"),
    }
}

/// List archive contents at debug level. Built-in codecs only.
async fn log_archive_entries(archive_path: &Path, method: &CompressionMethod) {
    if method.is_custom() || !tracing::enabled!(Level::DEBUG) {
        return;
    }
    let archive_path = archive_path.to_path_buf();
    let method = method.clone();
    let listed =
        tokio::task::spawn_blocking(move || archiver::list_archive(&archive_path, &method)).await;
    match listed {
        Ok(Ok(entries)) => {
            for entry in entries {
                debug!(entry = %entry.display(), "Archive entry");
            }
        }
        Ok(Err(e)) => debug!(error = %e, "Could not list archive"),
        Err(e) => debug!(error = %e, "Archive listing task failed"),
    }
}
