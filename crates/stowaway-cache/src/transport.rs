//! Archive transports: the built-in codec or an external archiver process.

use crate::archiver;
use crate::compression::CompressionMethod;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use stowaway_core::{Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Manifest of paths handed to the external archiver.
const MANIFEST_FILE_NAME: &str = "manifest.txt";

/// Host platform, as far as archiving is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    /// Detect the current platform.
    pub fn current() -> Self {
        #[cfg(target_os = "windows")]
        return Platform::Windows;
        #[cfg(target_os = "macos")]
        return Platform::Macos;
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        return Platform::Linux;
    }

    pub fn is_windows(self) -> bool {
        self == Platform::Windows
    }
}

/// How arguments reach the external archiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotingRule {
    /// Plain argv, no quoting.
    Posix,
    /// Raw command line: path arguments double-quoted, forward slashes.
    Windows,
}

/// Strategy for producing and consuming the local archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveTransport {
    InternalCodec,
    ExternalProcess {
        rule: QuotingRule,
        archiver: PathBuf,
    },
}

/// A fully built archiver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub rule: QuotingRule,
}

impl ArchiveTransport {
    /// Select the transport for one operation.
    pub fn select(platform: Platform, method: &CompressionMethod, windows_archiver: &Path) -> Self {
        if !method.is_custom() {
            return ArchiveTransport::InternalCodec;
        }
        if platform.is_windows() {
            ArchiveTransport::ExternalProcess {
                rule: QuotingRule::Windows,
                archiver: windows_archiver.to_path_buf(),
            }
        } else {
            ArchiveTransport::ExternalProcess {
                rule: QuotingRule::Posix,
                archiver: PathBuf::from("tar"),
            }
        }
    }

    /// Build an archive of `paths` in `folder`, rooted at `workspace`.
    pub async fn create(
        &self,
        folder: &Path,
        paths: &[PathBuf],
        workspace: &Path,
        method: &CompressionMethod,
    ) -> Result<PathBuf> {
        match self {
            ArchiveTransport::InternalCodec => {
                let folder = folder.to_path_buf();
                let paths = paths.to_vec();
                let workspace = workspace.to_path_buf();
                let method = method.clone();
                tokio::task::spawn_blocking(move || {
                    archiver::create_archive(&folder, &paths, &workspace, &method)
                })
                .await
                .map_err(|e| Error::Internal(format!("Archive task failed: {}", e)))?
            }
            ArchiveTransport::ExternalProcess { rule, archiver } => {
                let archive_path = folder.join(method.archive_file_name());
                let manifest = folder.join(MANIFEST_FILE_NAME);
                write_manifest(&manifest, paths).await?;

                let command =
                    create_command(*rule, archiver, &archive_path, &manifest, workspace, method)?;
                run_archiver(&command, workspace).await?;
                Ok(archive_path)
            }
        }
    }

    /// Extract `archive_path` onto `workspace`.
    pub async fn extract(
        &self,
        archive_path: &Path,
        workspace: &Path,
        method: &CompressionMethod,
    ) -> Result<()> {
        match self {
            ArchiveTransport::InternalCodec => {
                let archive_path = archive_path.to_path_buf();
                let workspace = workspace.to_path_buf();
                let method = method.clone();
                tokio::task::spawn_blocking(move || {
                    archiver::extract_archive(&archive_path, &workspace, &method)
                })
                .await
                .map_err(|e| Error::Internal(format!("Extract task failed: {}", e)))?
            }
            ArchiveTransport::ExternalProcess { rule, archiver } => {
                tokio::fs::create_dir_all(workspace).await?;
                let command = extract_command(*rule, archiver, archive_path, workspace, method)?;
                run_archiver(&command, workspace).await
            }
        }
    }
}

async fn write_manifest(manifest: &Path, paths: &[PathBuf]) -> Result<()> {
    let contents: String = paths
        .iter()
        .map(|p| format!("{}\n", p.display()))
        .collect();
    tokio::fs::write(manifest, contents).await?;
    Ok(())
}

/// Command line that packs the manifest into `archive_path`.
pub fn create_command(
    rule: QuotingRule,
    archiver: &Path,
    archive_path: &Path,
    manifest: &Path,
    workspace: &Path,
    method: &CompressionMethod,
) -> Result<ArchiverCommand> {
    let program = custom_program(method)?;

    let mut args = vec![
        "--posix".to_string(),
        "-cf".to_string(),
        path_arg(rule, archive_path),
        "--exclude".to_string(),
        path_arg(rule, archive_path),
        "-P".to_string(),
        "-C".to_string(),
        path_arg(rule, workspace),
        "--files-from".to_string(),
        path_arg(rule, manifest),
    ];
    if rule == QuotingRule::Windows {
        args.push("--force-local".to_string());
    }
    args.push("--use-compress-program".to_string());
    args.push(quote(rule, program));

    Ok(ArchiverCommand {
        program: archiver.to_path_buf(),
        args,
        rule,
    })
}

/// Command line that unpacks `archive_path` onto `workspace`.
pub fn extract_command(
    rule: QuotingRule,
    archiver: &Path,
    archive_path: &Path,
    workspace: &Path,
    method: &CompressionMethod,
) -> Result<ArchiverCommand> {
    let program = custom_program(method)?;

    let mut args = vec![
        "-xf".to_string(),
        path_arg(rule, archive_path),
        "-P".to_string(),
        "-C".to_string(),
        path_arg(rule, workspace),
    ];
    match rule {
        // GNU tar appends -d to the compress program when extracting.
        QuotingRule::Posix => {
            args.push("--use-compress-program".to_string());
            args.push(program.to_string());
        }
        QuotingRule::Windows => {
            args.push("--force-local".to_string());
            args.push("--use-compress-program".to_string());
            args.push(quote(rule, &format!("{} -d", program)));
        }
    }

    Ok(ArchiverCommand {
        program: archiver.to_path_buf(),
        args,
        rule,
    })
}

fn custom_program(method: &CompressionMethod) -> Result<&str> {
    method.program().ok_or_else(|| {
        Error::Internal(format!(
            "External archiver requires a custom compression program, got {}",
            method
        ))
    })
}

fn path_arg(rule: QuotingRule, path: &Path) -> String {
    match rule {
        QuotingRule::Posix => path.display().to_string(),
        QuotingRule::Windows => quote(rule, &path.display().to_string().replace('\\', "/")),
    }
}

fn quote(rule: QuotingRule, value: &str) -> String {
    match rule {
        QuotingRule::Posix => value.to_string(),
        QuotingRule::Windows => format!("\"{}\"", value.replace('"', "")),
    }
}

async fn run_archiver(command: &ArchiverCommand, workspace: &Path) -> Result<()> {
    info!(
        program = %command.program.display(),
        args = ?command.args,
        "Running external archiver"
    );

    let mut cmd = Command::new(&command.program);
    for arg in &command.args {
        match command.rule {
            #[cfg(windows)]
            QuotingRule::Windows => {
                cmd.raw_arg(arg);
            }
            _ => {
                cmd.arg(arg);
            }
        }
    }

    let output = cmd
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Process {
            program: command.program.display().to_string(),
            exit_code: None,
            stderr: format!("Failed to spawn process: {}", e),
        })?;

    debug!(status = ?output.status, "External archiver finished");

    if !output.status.success() {
        return Err(Error::Process {
            program: command.program.display().to_string(),
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}
