//! Command handlers.
//!
//! Step outputs (`cache-hit=...`) go to `out`; human-readable progress goes
//! to stderr and the log.

use crate::commands::{ListArgs, RestoreArgs, SaveArgs};
use console::style;
use std::io::Write;
use stowaway_cache::archiver;
use stowaway_cache::keys::{KeyList, validate_key, validate_paths};
use stowaway_cache::{CacheConfig, CacheId, CacheManager, CompressionMethod, RestoreOutcome};
use thiserror::Error;
use tracing::{info, warn};

/// Failures the CLI reports on top of library errors.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(
        "Failed to restore cache entry. Exiting as fail-on-cache-miss is set. Input key: {key}"
    )]
    CacheMiss { key: String },

    #[error("Listing task failed: {0}")]
    Task(String),
}

/// Restore a cache entry.
pub async fn restore(
    config: CacheConfig,
    args: &RestoreArgs,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.is_feature_available() {
        warn!("Cache service is not configured, skipping restore");
        writeln!(out, "cache-hit=false")?;
        return Ok(());
    }

    let outcome = match stowaway_cache::connect(&config) {
        Ok(client) => {
            CacheManager::new(client, config)
                .restore(&args.paths, &args.key, &args.restore_keys, &args.options())
                .await?
        }
        Err(e) => {
            validate_paths(&args.paths)?;
            KeyList::new(&args.key, &args.restore_keys)?;
            warn!(error = %e, "Cache service unavailable, skipping restore");
            RestoreOutcome::Miss
        }
    };

    writeln!(out, "cache-hit={}", outcome.is_exact_hit())?;
    if let Some(matched) = outcome.matched_key() {
        writeln!(out, "cache-matched-key={}", matched)?;
    }

    match &outcome {
        RestoreOutcome::Restored { key, .. } => {
            eprintln!("{} Cache restored from key: {}", style("✓").green(), key);
        }
        RestoreOutcome::LookupOnly { key, .. } => {
            eprintln!("{} Cache found for key: {}", style("✓").green(), key);
        }
        RestoreOutcome::Miss if args.fail_on_cache_miss => {
            return Err(CliError::CacheMiss {
                key: args.key.clone(),
            }
            .into());
        }
        RestoreOutcome::Miss => {
            let mut keys = vec![args.key.as_str()];
            keys.extend(args.restore_keys.iter().map(String::as_str));
            eprintln!(
                "{} Cache not found for input keys: {}",
                style("i").blue(),
                keys.join(", ")
            );
        }
    }
    Ok(())
}

/// Save paths under a key.
pub async fn save(
    config: CacheConfig,
    args: &SaveArgs,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    if !config.is_feature_available() {
        warn!("Cache service is not configured, skipping save");
        return Ok(());
    }

    if args.matched_key.as_deref() == Some(args.key.as_str()) {
        info!(key = %args.key, "Cache hit occurred on the primary key, not saving cache");
        eprintln!(
            "{} Cache hit occurred on the primary key {}, not saving cache",
            style("i").blue(),
            args.key
        );
        return Ok(());
    }

    let id = match stowaway_cache::connect(&config) {
        Ok(client) => {
            CacheManager::new(client, config)
                .save(&args.paths, &args.key, &args.options())
                .await?
        }
        Err(e) => {
            validate_paths(&args.paths)?;
            validate_key(&args.key)?;
            warn!(error = %e, "Cache service unavailable, skipping save");
            CacheId::NOT_SAVED
        }
    };

    writeln!(out, "cache-id={}", id)?;
    if id.is_saved() {
        eprintln!("{} Cache saved with key: {}", style("✓").green(), args.key);
    } else {
        eprintln!("{} Cache not saved for key: {}", style("!").yellow(), args.key);
    }
    Ok(())
}

/// Print the entries of a local archive.
pub async fn list(
    config: &CacheConfig,
    args: &ListArgs,
    out: &mut impl Write,
) -> Result<(), Box<dyn std::error::Error>> {
    let method = CompressionMethod::resolve(config.codec, args.custom_compression.as_deref());
    let archive = args.archive.clone();
    let entries = tokio::task::spawn_blocking(move || archiver::list_archive(&archive, &method))
        .await
        .map_err(|e| CliError::Task(e.to_string()))??;

    for entry in &entries {
        writeln!(out, "{}", entry.display())?;
    }
    eprintln!("{} {} entries", style("i").blue(), entries.len());
    Ok(())
}

/// Show the effective configuration.
pub fn show_config(config: &CacheConfig, out: &mut impl Write) -> Result<(), Box<dyn std::error::Error>> {
    writeln!(out, "Current configuration:")?;
    writeln!(
        out,
        "  cache_url: {}",
        config.cache_url.as_deref().unwrap_or("(not set)")
    )?;
    writeln!(
        out,
        "  token: {}",
        if config.token.is_some() { "***" } else { "(not set)" }
    )?;
    writeln!(out, "  workspace: {}", config.workspace_root().display())?;
    writeln!(out, "  temp_dir: {}", config.temp_root().display())?;
    writeln!(out, "  codec: {:?}", config.codec)?;
    writeln!(out, "  max_attempts: {}", config.max_attempts)?;

    if let Some(path) = crate::config::config_path() {
        writeln!(out, "\nConfig file: {}", path.display())?;
    }
    Ok(())
}
