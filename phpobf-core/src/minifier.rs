//! Minifier
//!
//! Strips comments and whitespace with PHP's own `php -w`. The stripper only
//! reads from disk, so text is staged through a uniquely named scratch file.
//! A leading `#!` line is held aside and restored afterwards.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Something that strips a PHP file down to its significant tokens
pub trait Stripper: Send + Sync {
    fn strip(&self, path: &Path) -> io::Result<String>;
}

/// Runs `<binary> -w <file>`
#[derive(Debug, Clone)]
pub struct PhpStripper {
    binary: PathBuf,
}

impl PhpStripper {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for PhpStripper {
    fn default() -> Self {
        Self::new("php")
    }
}

impl Stripper for PhpStripper {
    fn strip(&self, path: &Path) -> io::Result<String> {
        let output = Command::new(&self.binary)
            .arg("-w")
            .arg(path)
            .output()
            .map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!("Failed to run {}: {}", self.binary.display(), e),
                )
            })?;

        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} -w exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Split a leading interpreter directive (`#!...`) from the rest of the text
pub fn split_directive(text: &str) -> (Option<&str>, &str) {
    if !text.starts_with("#!") {
        return (None, text);
    }

    match text.find('\n') {
        Some(end) => (Some(text[..end].trim_end_matches('\r')), &text[end + 1..]),
        None => (Some(text.trim_end_matches('\r')), ""),
    }
}

pub struct Minifier {
    stripper: Box<dyn Stripper>,
}

impl Minifier {
    pub fn new(stripper: impl Stripper + 'static) -> Self {
        Self {
            stripper: Box::new(stripper),
        }
    }

    /// Minifier backed by the given PHP binary
    pub fn php(binary: impl Into<PathBuf>) -> Self {
        Self::new(PhpStripper::new(binary))
    }

    /// Strip text without any directive handling
    pub fn minify(&self, text: &str) -> io::Result<String> {
        let mut scratch = tempfile::Builder::new()
            .prefix("phpobf-")
            .suffix(".php")
            .tempfile()?;
        scratch.write_all(text.as_bytes())?;
        scratch.flush()?;

        let stripped = self.stripper.strip(scratch.path());
        scratch.close()?;
        stripped
    }

    /// Strip a whole script, keeping its `#!` line in place
    pub fn minify_script(&self, text: &str) -> io::Result<String> {
        match split_directive(text) {
            (Some(directive), body) => {
                let stripped = self.minify(body)?;
                Ok(format!("{}\n{}", directive, stripped))
            }
            (None, body) => self.minify(body),
        }
    }
}
