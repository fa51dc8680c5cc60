use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

/// Resolve a configured path against the working directory.
pub fn resolve_in(workdir: &Path, path: &Path) -> PathBuf {
    let expanded = expand_tilde(&path.to_string_lossy());
    if expanded.is_absolute() {
        expanded
    } else {
        workdir.join(expanded)
    }
}

/// True when `path` stays strictly below the directory it is joined onto.
pub fn is_contained_relative(path: &Path) -> bool {
    if path.as_os_str().is_empty() || path.is_absolute() {
        return false;
    }
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            _ => return false,
        }
    }
    depth > 0
}

/// Build a search path with `dir` in front of the inherited entries.
pub fn prepend_search_path(dir: &Path, inherited: Option<OsString>) -> Result<OsString> {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(existing) = inherited {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries)
        .with_context(|| format!("cannot add {} to the search path", dir.display()))
}
