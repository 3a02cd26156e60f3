//! Cross-platform path utilities
//!
//! Windows paths use backslashes (`\`) while directory keys used for header
//! matching always use forward slashes (`/`).

use std::path::{Path, PathBuf};

/// Normalize path to forward slashes
#[inline]
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Convert a path to a normalized string
#[inline]
pub fn path_to_string(path: &Path) -> String {
    normalize_path(&path.to_string_lossy())
}

/// Append suffix to path, return normalized string
#[inline]
pub fn path_with_suffix(path: &Path, suffix: &str) -> String {
    format!("{}{}", path_to_string(path), suffix)
}

/// Create PathBuf from path + suffix
#[inline]
pub fn pathbuf_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(path_with_suffix(path, suffix))
}

/// Directory key for a relative directory: forward slashes, no leading
/// slash, exactly one trailing slash. The root directory maps to "".
///
/// The trailing slash keeps `a/` from being a prefix of `ab/`.
pub fn dir_key(dir: &Path) -> String {
    let normalized = path_to_string(dir);
    let trimmed = normalized.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        String::new()
    } else {
        format!("{}/", trimmed.trim_start_matches("./"))
    }
}
