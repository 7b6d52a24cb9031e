//! Cache configuration.

use crate::compression::Codec;
use serde::{Deserialize, Serialize};
use std::path::{Component, PathBuf};
use stowaway_core::{Error, Result};

pub const ENV_CACHE_URL: &str = "STOWAWAY_CACHE_URL";
pub const ENV_TOKEN: &str = "STOWAWAY_RUNTIME_TOKEN";
pub const ENV_WORKSPACE: &str = "STOWAWAY_WORKSPACE";
pub const ENV_TEMP: &str = "STOWAWAY_TEMP";
pub const ENV_CODEC: &str = "STOWAWAY_CODEC";

/// Configuration for the cache pipelines and the remote client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache service base URL. Its presence enables the feature.
    #[serde(default)]
    pub cache_url: Option<String>,
    /// Bearer token for the cache service.
    #[serde(default)]
    pub token: Option<String>,
    /// Workspace root that archives are rooted at.
    #[serde(default)]
    pub workspace: Option<PathBuf>,
    /// Parent directory for per-operation scratch directories.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Built-in codec used when no custom compression is requested.
    #[serde(default)]
    pub codec: Codec,
    /// Upload chunk size in bytes.
    #[serde(default = "default_upload_chunk_size")]
    pub upload_chunk_size: usize,
    /// Attempts per HTTP request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between HTTP attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Largest archive a save will upload.
    #[serde(default = "default_max_archive_size")]
    pub max_archive_size: u64,
    /// Bundled archiver used for custom compression on Windows.
    #[serde(default = "default_windows_archiver")]
    pub windows_archiver: PathBuf,
}

fn default_upload_chunk_size() -> usize {
    32 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_max_archive_size() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_windows_archiver() -> PathBuf {
    PathBuf::from("C:\\Program Files\\Git\\usr\\bin\\tar.exe")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_url: None,
            token: None,
            workspace: None,
            temp_dir: None,
            codec: Codec::default(),
            upload_chunk_size: default_upload_chunk_size(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_archive_size: default_max_archive_size(),
            windows_archiver: default_windows_archiver(),
        }
    }
}

impl CacheConfig {
    /// Create a config pointing at a cache service.
    pub fn new(cache_url: impl Into<String>) -> Self {
        Self {
            cache_url: Some(cache_url.into()),
            ..Default::default()
        }
    }

    /// Overlay `STOWAWAY_*` variables looked up through `var`.
    ///
    /// Reads:
    /// - `STOWAWAY_CACHE_URL`: cache service base URL
    /// - `STOWAWAY_RUNTIME_TOKEN`: bearer token
    /// - `STOWAWAY_WORKSPACE`: workspace root
    /// - `STOWAWAY_TEMP`: scratch directory parent
    /// - `STOWAWAY_CODEC`: built-in codec (`zstd`, `gzip`, `lz4`, `tar`)
    ///
    /// Empty values are ignored. An unknown codec is a validation error.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(ENV_CACHE_URL) {
            self.cache_url = Some(url);
        }
        if let Some(token) = non_empty(ENV_TOKEN) {
            self.token = Some(token);
        }
        if let Some(workspace) = non_empty(ENV_WORKSPACE) {
            self.workspace = Some(PathBuf::from(workspace));
        }
        if let Some(temp) = non_empty(ENV_TEMP) {
            self.temp_dir = Some(PathBuf::from(temp));
        }
        if let Some(codec) = non_empty(ENV_CODEC) {
            self.codec = codec
                .parse()
                .map_err(|e| Error::Validation(format!("Invalid {}: {}", ENV_CODEC, e)))?;
        }
        Ok(())
    }

    /// Whether a cache service is configured.
    pub fn is_feature_available(&self) -> bool {
        self.cache_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    /// Absolute workspace root, falling back to the current directory.
    ///
    /// A relative workspace is joined onto the current directory and `.`
    /// components are dropped.
    pub fn workspace_root(&self) -> PathBuf {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let root = match &self.workspace {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd,
        };
        root.components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }

    /// Parent of scratch directories, falling back to the system temp dir.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the workspace root.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Set the scratch directory parent.
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }

    /// Set the built-in codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Set the HTTP retry policy.
    pub fn with_retries(mut self, max_attempts: u32, retry_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Set the upload chunk size.
    pub fn with_upload_chunk_size(mut self, bytes: usize) -> Self {
        self.upload_chunk_size = bytes.max(1);
        self
    }

    /// Set the largest archive a save will upload.
    pub fn with_max_archive_size(mut self, bytes: u64) -> Self {
        self.max_archive_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_availability() {
        assert!(!CacheConfig::default().is_feature_available());
        assert!(!CacheConfig::new("  ").is_feature_available());
        assert!(CacheConfig::new("https://cache.example.com/").is_feature_available());
    }

    #[test]
    fn test_workspace_fallback() {
        let config = CacheConfig::default();
        assert_eq!(
            config.workspace_root(),
            std::env::current_dir().unwrap()
        );
        let config = config.with_workspace("/work");
        assert_eq!(config.workspace_root(), PathBuf::from("/work"));
    }

    #[test]
    fn test_relative_workspace_is_made_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let config = CacheConfig::default().with_workspace("./ws");
        let root = config.workspace_root();
        assert!(root.is_absolute());
        assert_eq!(root, cwd.join("ws"));
        assert!(
            !root
                .components()
                .any(|c| matches!(c, Component::CurDir))
        );

        let config = CacheConfig::default().with_workspace("/work/./out");
        assert_eq!(config.workspace_root(), PathBuf::from("/work/out"));
    }

    #[test]
    fn test_apply_env_ignores_empty_values() {
        let mut config = CacheConfig::new("https://cache.example.com/").with_token("t");
        config
            .apply_env(|name| match name {
                ENV_TOKEN => Some(String::new()),
                ENV_CODEC => Some("gzip".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.token.as_deref(), Some("t"));
        assert_eq!(config.codec, Codec::Gzip);
    }

    #[test]
    fn test_apply_env_rejects_unknown_codec() {
        let mut config = CacheConfig::default();
        let err = config
            .apply_env(|name| (name == ENV_CODEC).then(|| "brotli".to_string()))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(config.codec, Codec::default());
    }

    #[test]
    fn test_deserialize_defaults() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"cache_url":"http://localhost:9000/","codec":"gzip"}"#)
                .unwrap();
        assert_eq!(config.codec, Codec::Gzip);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.upload_chunk_size, 32 * 1024 * 1024);
    }
}
