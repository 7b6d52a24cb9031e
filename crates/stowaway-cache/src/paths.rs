//! Resolution of user path patterns to concrete existing paths.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use stowaway_core::{Error, Result};
use tracing::debug;

/// Expands path patterns into existing paths.
pub trait PathResolver: Send + Sync {
    /// Resolve patterns into a deduplicated list of existing paths.
    fn resolve(&self, patterns: &[String]) -> Result<Vec<PathBuf>>;
}

/// Glob-based resolver rooted at a workspace directory.
///
/// Patterns starting with `!` exclude previously matched paths. A leading `~`
/// expands to the home directory. Matches inside the workspace are returned
/// relative to it.
#[derive(Debug, Clone)]
pub struct GlobResolver {
    workspace: PathBuf,
}

impl GlobResolver {
    /// A relative workspace is anchored at the current directory.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let workspace = if workspace.is_absolute() {
            workspace
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&workspace))
                .unwrap_or(workspace)
        };
        Self {
            workspace: workspace
                .components()
                .filter(|c| !matches!(c, Component::CurDir))
                .collect(),
        }
    }

    fn absolute_pattern(&self, pattern: &str) -> String {
        let expanded = expand_home(pattern);
        let expanded = expanded.trim_start_matches("./").to_string();
        if Path::new(&expanded).is_absolute() {
            expanded
        } else {
            let root = glob::Pattern::escape(&self.workspace.to_string_lossy());
            format!("{}/{}", root.trim_end_matches(['/', '\\']), expanded)
        }
    }

    fn relativize(&self, path: PathBuf) -> PathBuf {
        let path: PathBuf = path
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        match path.strip_prefix(&self.workspace) {
            Ok(relative) if relative.as_os_str().is_empty() => PathBuf::from("."),
            Ok(relative) => relative.to_path_buf(),
            Err(_) => path,
        }
    }
}

impl PathResolver for GlobResolver {
    fn resolve(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        for pattern in patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            match pattern.strip_prefix('!') {
                Some(negated) => {
                    let compiled = glob::Pattern::new(&self.absolute_pattern(negated.trim()))
                        .map_err(|e| {
                            Error::Validation(format!("Invalid path pattern {}: {}", pattern, e))
                        })?;
                    excludes.push(compiled);
                }
                None => includes.push(self.absolute_pattern(pattern)),
            }
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::new();
        for pattern in includes {
            let matches = glob::glob(&pattern).map_err(|e| {
                Error::Validation(format!("Invalid path pattern {}: {}", pattern, e))
            })?;
            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        debug!(error = %e, "Skipping unreadable path");
                        continue;
                    }
                };
                if !path.exists() || excludes.iter().any(|ex| ex.matches_path(&path)) {
                    continue;
                }
                let path = self.relativize(path);
                if seen.insert(path.clone()) {
                    resolved.push(path);
                }
            }
        }

        debug!(count = resolved.len(), "Resolved cache paths");
        Ok(resolved)
    }
}

fn expand_home(pattern: &str) -> String {
    let Some(rest) = pattern.strip_prefix('~') else {
        return pattern.to_string();
    };
    if !(rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\')) {
        return pattern.to_string();
    }
    match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        Some(home) => format!("{}{}", Path::new(&home).display(), rest),
        None => pattern.to_string(),
    }
}
