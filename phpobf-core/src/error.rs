//! Error types shared by the build, the library surface and the CLI.

use std::path::PathBuf;

/// Errors produced while obfuscating a file or a tree
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unusable layout or configuration; halts the whole run
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cannot access {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot process file {}: {message}", path.display())]
    Encoding { path: PathBuf, message: String },

    #[error("Unsupported file type {content_type}: {}", path.display())]
    UnsupportedType { path: PathBuf, content_type: String },

    #[error("Run interrupted")]
    Interrupted,
}

impl Error {
    pub(crate) fn access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileAccess {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walk(root: &std::path::Path, err: walkdir::Error) -> Self {
        let path = err.path().unwrap_or(root).to_path_buf();
        let source = err
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
        Error::FileAccess { path, source }
    }

    pub(crate) fn encoding(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Error::Encoding {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
