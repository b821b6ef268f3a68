//! Loading a project directory into a [`FileMap`]

use anyhow::{bail, Context, Result};
use labrun_sandbox::FileMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Largest file loaded into the project
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

const SKIPPED_DIRS: &[&str] = &["node_modules", "__pycache__", "target"];

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

/// Read every text file under `root`, keyed by `/`-separated relative path
pub fn load_project(root: &Path) -> Result<FileMap> {
    if !root.is_dir() {
        bail!("Project directory not found: {}", root.display());
    }

    let mut files = FileMap::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > MAX_FILE_BYTES {
            debug!(path = %path.display(), size, "Skipping large file");
            continue;
        }

        let content = match std::fs::read(path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(path = %path.display(), "Skipping non-UTF-8 file");
                    continue;
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read project file");
                continue;
            }
        };

        files.insert(relative_key(root, path)?, content);
    }

    debug!(root = %root.display(), files = files.len(), "Project loaded");
    Ok(files)
}

fn relative_key(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Project root and the entry's key within it.
///
/// Without an explicit project the entry's directory is the project.
pub fn resolve_entry(file: &Path, project: Option<&Path>) -> Result<(PathBuf, String)> {
    let file = file
        .canonicalize()
        .with_context(|| format!("File not found: {}", file.display()))?;

    let root = match project {
        Some(project) => project
            .canonicalize()
            .with_context(|| format!("Project directory not found: {}", project.display()))?,
        None => file
            .parent()
            .map(Path::to_path_buf)
            .context("File has no parent directory")?,
    };

    let key = relative_key(&root, &file)?;
    Ok((root, key))
}
