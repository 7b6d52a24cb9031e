//! CLI configuration loading.
//!
//! Precedence, lowest first: built-in defaults, the YAML config file,
//! `STOWAWAY_*` environment variables, command-line flags.

use std::path::{Path, PathBuf};
use stowaway_cache::{CacheConfig, Codec};

/// Values supplied as global command-line flags.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_url: Option<String>,
    pub token: Option<String>,
    pub workspace: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub codec: Option<Codec>,
}

/// Default config file location.
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "stowaway", "stowaway")
        .map(|dirs| dirs.config_dir().join("config.yaml"))
}

/// Load the config file.
///
/// An explicit path must exist. The default path is optional.
pub fn load_file(explicit: Option<&Path>) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(CacheConfig::default()),
        },
    };
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Could not read config file {}: {}", path.display(), e))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    if content.trim().is_empty() {
        return Ok(CacheConfig::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Overlay command-line flags.
pub fn apply_overrides(config: &mut CacheConfig, overrides: Overrides) {
    if let Some(url) = overrides.cache_url {
        config.cache_url = Some(url);
    }
    if let Some(token) = overrides.token {
        config.token = Some(token);
    }
    if let Some(workspace) = overrides.workspace {
        config.workspace = Some(workspace);
    }
    if let Some(temp_dir) = overrides.temp_dir {
        config.temp_dir = Some(temp_dir);
    }
    if let Some(codec) = overrides.codec {
        config.codec = codec;
    }
}

/// Resolve the effective configuration from every source.
pub fn load(
    explicit: Option<&Path>,
    overrides: Overrides,
) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let mut config = load_file(explicit)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    apply_overrides(&mut config, overrides);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use stowaway_cache::config::{ENV_CACHE_URL, ENV_CODEC, ENV_TOKEN, ENV_WORKSPACE};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = parse(
            r#"
cache_url: https://cache.example.com/
codec: gzip
max_attempts: 4
"#,
        )
        .unwrap();
        assert_eq!(config.cache_url.as_deref(), Some("https://cache.example.com/"));
        assert_eq!(config.codec, Codec::Gzip);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.upload_chunk_size, CacheConfig::default().upload_chunk_size);
    }

    #[test]
    fn test_parse_empty_file() {
        let config = parse("\n").unwrap();
        assert!(!config.is_feature_available());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_file(Some(&dir.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = parse("cache_url: https://file.example.com/\ntoken: file-token\n").unwrap();
        config
            .apply_env(env(&[
                (ENV_CACHE_URL, "https://env.example.com/"),
                (ENV_TOKEN, ""),
                (ENV_CODEC, "lz4"),
                (ENV_WORKSPACE, "/work"),
            ]))
            .unwrap();
        assert_eq!(config.cache_url.as_deref(), Some("https://env.example.com/"));
        assert_eq!(config.token.as_deref(), Some("file-token"));
        assert_eq!(config.codec, Codec::Lz4);
        assert_eq!(config.workspace, Some(PathBuf::from("/work")));
    }

    #[test]
    fn test_invalid_env_codec() {
        let mut config = CacheConfig::default();
        assert!(config.apply_env(env(&[(ENV_CODEC, "brotli")])).is_err());
    }

    #[test]
    fn test_flags_override_env() {
        let mut config = CacheConfig::default();
        config
            .apply_env(env(&[(ENV_CACHE_URL, "https://env.example.com/")]))
            .unwrap();
        apply_overrides(
            &mut config,
            Overrides {
                cache_url: Some("file:///tmp/cache".into()),
                codec: Some(Codec::Tar),
                ..Default::default()
            },
        );
        assert_eq!(config.cache_url.as_deref(), Some("file:///tmp/cache"));
        assert_eq!(config.codec, Codec::Tar);
    }
}
