//! CLI command definitions.

use clap::{Args, Subcommand};
use std::path::PathBuf;
use stowaway_cache::{RestoreOptions, SaveOptions, TransferMode};

#[derive(Subcommand)]
pub enum Commands {
    /// Restore a cache onto the workspace
    Restore(RestoreArgs),

    /// Save paths to the cache
    Save(SaveArgs),

    /// List the entries of a local cache archive
    List(ListArgs),

    /// Show the effective configuration
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Primary key, matched exactly
    #[arg(short, long)]
    pub key: String,

    /// Fallback key prefixes, tried in order
    #[arg(short, long = "restore-key")]
    pub restore_keys: Vec<String>,

    /// Paths or glob patterns to restore
    #[arg(short, long = "path", required = true)]
    pub paths: Vec<String>,

    /// Check for a matching entry without downloading it
    #[arg(long)]
    pub lookup_only: bool,

    /// Exit with an error when no entry matches
    #[arg(long)]
    pub fail_on_cache_miss: bool,

    /// Transfer files individually instead of as one archive
    #[arg(long)]
    pub sync: bool,

    /// External compression program, `none` for the built-in codec
    #[arg(long)]
    pub custom_compression: Option<String>,

    /// Share the entry between operating systems
    #[arg(long)]
    pub cross_os: bool,
}

impl RestoreArgs {
    pub fn options(&self) -> RestoreOptions {
        RestoreOptions {
            lookup_only: self.lookup_only,
            mode: transfer_mode(self.sync),
            custom_compression: self.custom_compression.clone(),
            enable_cross_os_archive: self.cross_os,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SaveArgs {
    /// Key to save under
    #[arg(short, long)]
    pub key: String,

    /// Paths or glob patterns to save; `!pattern` excludes
    #[arg(short, long = "path", required = true)]
    pub paths: Vec<String>,

    /// Transfer files individually instead of as one archive
    #[arg(long)]
    pub sync: bool,

    /// External compression program, `none` for the built-in codec
    #[arg(long)]
    pub custom_compression: Option<String>,

    /// Share the entry between operating systems
    #[arg(long)]
    pub cross_os: bool,

    /// Key matched by an earlier restore; an exact match skips the save
    #[arg(long)]
    pub matched_key: Option<String>,
}

impl SaveArgs {
    pub fn options(&self) -> SaveOptions {
        SaveOptions {
            mode: transfer_mode(self.sync),
            custom_compression: self.custom_compression.clone(),
            enable_cross_os_archive: self.cross_os,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Archive file to read
    #[arg(short, long)]
    pub archive: PathBuf,

    /// Compression the archive was written with
    #[arg(long)]
    pub custom_compression: Option<String>,
}

fn transfer_mode(sync: bool) -> TransferMode {
    if sync {
        TransferMode::Sync
    } else {
        TransferMode::Archive
    }
}
