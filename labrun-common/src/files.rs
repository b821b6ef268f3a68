//! Project file set handed to a run

use crate::language::{detect_language, Language};
use std::collections::BTreeMap;

/// Relative path → in-editor source text for every known project file.
///
/// Ordered so that inlining and filesystem writes are deterministic.
pub type FileMap = BTreeMap<String, String>;

/// Normalize a project-relative path.
///
/// Backslashes become slashes and `.` components are dropped. Returns `None`
/// for absolute paths, paths escaping the project root, and empty paths.
pub fn normalize_relative_path(path: &str) -> Option<String> {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') || unified.contains(':') {
        return None;
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return None,
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Files of `files` that can share scope with a run of `language`, in path order.
///
/// The file at `entry_path` is skipped so the entry is never inlined into
/// itself. Paths are compared after normalization, never by content.
pub fn sibling_sources<'a>(
    files: &'a FileMap,
    language: Language,
    entry_path: &str,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    let entry = normalize_relative_path(entry_path).unwrap_or_else(|| entry_path.to_string());
    files.iter().filter_map(move |(path, text)| {
        let lang = detect_language(path)?;
        let is_entry = normalize_relative_path(path).as_deref() == Some(entry.as_str());
        (language.shares_scope_with(lang) && !is_entry).then_some((path.as_str(), text.as_str()))
    })
}
