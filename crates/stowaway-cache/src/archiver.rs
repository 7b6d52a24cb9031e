//! Tar archives through the built-in codecs.

use crate::compression::CompressionMethod;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Component, Path, PathBuf};
use stowaway_core::{Error, Result};
use tracing::debug;

/// Top-level archive directory holding paths that live outside the base dir.
const ROOT_PREFIX: &str = "__root__";

/// Create an archive of `paths` inside `folder` and return its path.
///
/// Relative paths are resolved against `base_dir` and stored relative to it.
/// The archive file itself is never packed, even when it sits under one of
/// the archived directories.
pub fn create_archive(
    folder: &Path,
    paths: &[PathBuf],
    base_dir: &Path,
    method: &CompressionMethod,
) -> Result<PathBuf> {
    let archive_path = folder.join(method.archive_file_name());
    let file = File::create(&archive_path)?;
    let encoder = method.encoder(BufWriter::new(file))?;

    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for p in paths {
        let abs_path = if p.is_absolute() {
            p.clone()
        } else {
            base_dir.join(p)
        };
        if std::fs::symlink_metadata(&abs_path).is_err() {
            return Err(Error::Archive(format!(
                "Path {} disappeared before archiving",
                abs_path.display()
            )));
        }

        let name = archive_name(p, base_dir);
        debug!(path = %abs_path.display(), name = %name.display(), "Adding path to archive");
        append_tree(&mut builder, &name, &abs_path, &archive_path)?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| Error::Archive(format!("Failed to finish tar: {}", e)))?;
    let mut writer = encoder.finish()?;
    std::io::Write::flush(&mut writer)?;

    Ok(archive_path)
}

/// Extract an archive into `dest`.
pub fn extract_archive(archive_path: &Path, dest: &Path, method: &CompressionMethod) -> Result<()> {
    let file = File::open(archive_path)?;
    let decoder = method.decoder(BufReader::new(file))?;
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);

    std::fs::create_dir_all(dest)?;

    let entries = archive
        .entries()
        .map_err(|e| Error::Archive(format!("Failed to read archive: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| Error::Archive(format!("Failed to read entry: {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| Error::Archive(format!("Invalid entry path: {}", e)))?
            .into_owned();

        match outside_target(&name) {
            Some(target) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry.unpack(&target).map_err(|e| {
                    Error::Archive(format!("Failed to unpack {}: {}", target.display(), e))
                })?;
            }
            None => {
                entry.unpack_in(dest).map_err(|e| {
                    Error::Archive(format!("Failed to unpack {}: {}", name.display(), e))
                })?;
            }
        }
    }
    Ok(())
}

/// List the entry paths of an archive.
pub fn list_archive(archive_path: &Path, method: &CompressionMethod) -> Result<Vec<PathBuf>> {
    let file = File::open(archive_path)?;
    let decoder = method.decoder(BufReader::new(file))?;
    let mut archive = tar::Archive::new(decoder);

    let mut listed = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| Error::Archive(format!("Failed to read archive: {}", e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::Archive(format!("Failed to read entry: {}", e)))?;
        let name = entry
            .path()
            .map_err(|e| Error::Archive(format!("Invalid entry path: {}", e)))?
            .into_owned();
        listed.push(outside_target(&name).unwrap_or(name));
    }
    Ok(listed)
}

fn archive_name(requested: &Path, base_dir: &Path) -> PathBuf {
    if !requested.is_absolute() {
        return requested.to_path_buf();
    }
    if let Ok(relative) = requested.strip_prefix(base_dir) {
        if relative.as_os_str().is_empty() {
            return PathBuf::from(".");
        }
        return relative.to_path_buf();
    }
    let mut name = PathBuf::from(ROOT_PREFIX);
    for component in requested.components() {
        if let Component::Normal(part) = component {
            name.push(part);
        }
    }
    name
}

/// Map a `__root__/...` entry back to its absolute location.
fn outside_target(name: &Path) -> Option<PathBuf> {
    let rest = name.strip_prefix(ROOT_PREFIX).ok()?;
    let root = if cfg!(windows) { "\\" } else { "/" };
    Some(Path::new(root).join(rest))
}

fn append_tree<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    name: &Path,
    path: &Path,
    exclude: &Path,
) -> Result<()> {
    if path == exclude {
        return Ok(());
    }

    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        if name != Path::new(".") {
            builder
                .append_dir(name, path)
                .map_err(|e| Error::Archive(format!("Failed to pack dir: {}", e)))?;
        }
        let mut children: Vec<_> = std::fs::read_dir(path)?.collect::<std::io::Result<_>>()?;
        children.sort_by_key(|entry| entry.file_name());
        for child in children {
            let child_name = if name == Path::new(".") {
                PathBuf::from(child.file_name())
            } else {
                name.join(child.file_name())
            };
            append_tree(builder, &child_name, &child.path(), exclude)?;
        }
    } else {
        builder
            .append_path_with_name(path, name)
            .map_err(|e| Error::Archive(format!("Failed to pack file: {}", e)))?;
    }
    Ok(())
}
