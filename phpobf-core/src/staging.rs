//! Output staging and freshness
//!
//! Every output is written to a temporary file next to its target and renamed
//! into place, so an interrupted run never leaves a partial target that a
//! later run would consider fresh.

use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

fn stage_for(target: &Path) -> Result<NamedTempFile> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    tempfile::Builder::new()
        .prefix(".phpobf-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(|e| Error::access(target, e))
}

fn commit(staged: NamedTempFile, target: &Path, permissions: Option<Permissions>) -> Result<()> {
    if let Some(permissions) = permissions {
        fs::set_permissions(staged.path(), permissions).map_err(|e| Error::access(target, e))?;
    }
    staged
        .persist(target)
        .map_err(|e| Error::access(target, e.error))?;
    Ok(())
}

/// Atomically replace `target` with `contents`
pub fn write_atomic(target: &Path, contents: &[u8], permissions: Option<Permissions>) -> Result<()> {
    let mut staged = stage_for(target)?;
    staged
        .write_all(contents)
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| Error::access(target, e))?;
    commit(staged, target, permissions)
}

/// Atomically copy `source` over `target`, keeping the source's permissions
pub fn copy_atomic(source: &Path, target: &Path) -> Result<u64> {
    let mut input = File::open(source).map_err(|e| Error::access(source, e))?;
    let permissions = input
        .metadata()
        .map(|m| m.permissions())
        .map_err(|e| Error::access(source, e))?;

    let mut staged = stage_for(target)?;
    let bytes = io::copy(&mut input, staged.as_file_mut())
        .and_then(|n| staged.as_file().sync_all().map(|_| n))
        .map_err(|e| Error::access(target, e))?;
    commit(staged, target, Some(permissions))?;
    Ok(bytes)
}

/// Whole seconds since the Unix epoch, floored
pub fn whole_seconds(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(e) => {
            let before = e.duration();
            let secs = before.as_secs() as i64;
            if before.subsec_nanos() > 0 {
                -secs - 1
            } else {
                -secs
            }
        }
    }
}

/// A target is fresh when it exists and its mtime is at least the source's.
///
/// Comparison is in whole seconds, so an edit landing in the same second as
/// the previous write is not noticed.
pub fn is_fresh(source_modified: SystemTime, target: &Path) -> bool {
    match fs::metadata(target).and_then(|m| m.modified()) {
        Ok(target_modified) => whole_seconds(source_modified) <= whole_seconds(target_modified),
        Err(_) => false,
    }
}
