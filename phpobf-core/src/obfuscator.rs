//! Single-file and single-directory obfuscation
//!
//! The library entry points for callers that do not need incremental builds:
//! no freshness checks, no headers, every file is written.

use std::fs;
use std::path::{Path, PathBuf};

use crate::build::reject_overlap;
use crate::config::Config;
use crate::content_type::{is_allowed, sniff_file};
use crate::encoder::{Encoder, RunKeys};
use crate::error::{Error, Result};
use crate::minifier::Minifier;
use crate::script::{is_script, ScriptSource};
use crate::staging::{copy_atomic, write_atomic};

/// Counts from a directory run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryReport {
    pub encoded: usize,
    pub copied: usize,
}

/// Obfuscator instance with one set of run keys
pub struct Obfuscator {
    encoder: Encoder,
    minifier: Minifier,
    recursive: bool,
}

impl Obfuscator {
    pub fn new(encoder: Encoder, minifier: Minifier) -> Self {
        Self {
            encoder,
            minifier,
            recursive: true,
        }
    }

    /// Obfuscator using `php` from PATH and fresh run keys
    pub fn with_rounds(rounds: u32) -> Self {
        Self::new(Encoder::new(RunKeys::generate(), rounds), Minifier::php("php"))
    }

    pub fn from_config(config: &Config) -> Self {
        let encoder = Encoder::new(RunKeys::generate(), config.rounds())
            .with_chunk_width(config.chunk_width());
        Self::new(encoder, Minifier::php(config.php_binary()))
    }

    /// Whether directory mode descends into subdirectories (default: true)
    pub fn set_recursive(&mut self, recursive: bool) {
        self.recursive = recursive;
    }

    pub fn recursive(&self) -> bool {
        self.recursive
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Minify and encode a script, returning the output text
    pub fn process(&self, source: &Path) -> Result<String> {
        let (root, relative) = split_path(source);
        let script = ScriptSource::load(root, relative)?;

        let minified = self
            .minifier
            .minify_script(&script.text)
            .map_err(|e| Error::encoding(source, e))?;
        self.encoder
            .encode(&minified, None)
            .map_err(|e| Error::encoding(source, e))
    }

    /// Obfuscate one file into `target`
    pub fn obfuscate_file(&self, path: &Path, target: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(Error::access(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "does not exist or is not readable",
                ),
            ));
        }

        let encoded = self.process(path)?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::access(parent, e))?;
        }
        let permissions = fs::metadata(path)
            .map(|m| m.permissions())
            .map_err(|e| Error::access(path, e))?;
        write_atomic(target, encoded.as_bytes(), Some(permissions))?;
        tracing::debug!("Obfuscated {} -> {}", path.display(), target.display());
        Ok(())
    }

    /// Obfuscate every script under `path` into `target`, copying other
    /// files whose content type is allowed.
    ///
    /// A disallowed file aborts the rest of the directory. `target` must not
    /// lie inside `path` or contain it.
    pub fn obfuscate_directory(&self, path: &Path, target: &Path) -> Result<DirectoryReport> {
        if !path.is_dir() {
            return Err(Error::access(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "directory does not exist or is not readable",
                ),
            ));
        }

        fs::create_dir_all(target).map_err(|e| Error::access(target, e))?;
        reject_overlap(path, "Target", target)?;

        let mut report = DirectoryReport::default();
        self.process_directory(path, target, &mut report)?;
        tracing::info!(
            "Obfuscated {}: {} encoded, {} copied",
            path.display(),
            report.encoded,
            report.copied
        );
        Ok(report)
    }

    fn process_directory(&self, dir: &Path, target: &Path, report: &mut DirectoryReport) -> Result<()> {
        fs::create_dir_all(target).map_err(|e| Error::access(target, e))?;

        let mut entries: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| Error::access(dir, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .map_err(|e| Error::access(dir, e))?;
        entries.sort();

        for path in entries {
            let Some(name) = path.file_name() else {
                continue;
            };
            let destination = target.join(name);

            if path.is_dir() {
                if self.recursive {
                    self.process_directory(&path, &destination, report)?;
                }
                continue;
            }
            if !path.is_file() {
                continue;
            }

            if is_script(&path) {
                self.obfuscate_file(&path, &destination)?;
                report.encoded += 1;
                continue;
            }

            let content_type = sniff_file(&path).map_err(|e| Error::access(&path, e))?;
            if !is_allowed(content_type) {
                return Err(Error::UnsupportedType {
                    path,
                    content_type: content_type.to_string(),
                });
            }
            copy_atomic(&path, &destination)?;
            report.copied += 1;
        }

        Ok(())
    }
}

fn split_path(path: &Path) -> (&Path, &Path) {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => (parent, Path::new(name)),
        _ => (Path::new(""), path),
    }
}
