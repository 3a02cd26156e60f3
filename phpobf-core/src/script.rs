//! Script sources

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::minifier::split_directive;

/// Extension of files that get encoded; everything else is copied
pub const SCRIPT_EXTENSION: &str = "php";

/// Whether a path is a script by extension
pub fn is_script(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SCRIPT_EXTENSION)
}

/// A script read from the source tree
#[derive(Debug, Clone)]
pub struct ScriptSource {
    /// Path relative to the source root
    pub relative_path: PathBuf,
    /// Raw text, directive line included
    pub text: String,
    /// Source modification time
    pub modified: SystemTime,
    /// Whether the script starts with an interpreter directive
    pub is_console: bool,
    /// The `#!` line, if any
    pub directive: Option<String>,
}

impl ScriptSource {
    /// Read `relative` under `root`
    pub fn load(root: &Path, relative: &Path) -> Result<Self> {
        let path = root.join(relative);
        let bytes = fs::read(&path).map_err(|e| Error::access(&path, e))?;
        let modified = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_err(|e| Error::access(&path, e))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::encoding(&path, format!("not valid UTF-8: {}", e)))?;

        let directive = split_directive(&text).0.map(str::to_string);

        Ok(Self {
            relative_path: relative.to_path_buf(),
            is_console: directive.is_some(),
            directive,
            text,
            modified,
        })
    }

    /// Directory of the script, relative to the source root
    pub fn dir(&self) -> &Path {
        self.relative_path.parent().unwrap_or(Path::new(""))
    }
}
