//! phpobf Core Library
//!
//! This crate provides the core functionality for phpobf:
//! - Incremental builds of a PHP source tree into an obfuscated target tree
//! - Minification through `php -w`
//! - The encoder pipeline (deflate, base64, alias indirection)
//! - Per-directory license headers from `config.cnf` files
//! - Single-file and single-directory obfuscation
//! - Watch mode

pub mod build;
pub mod config;
pub mod content_type;
pub mod encoder;
pub mod error;
pub mod header;
pub mod minifier;
pub mod obfuscator;
pub mod path_utils;
pub mod script;
pub mod staging;
pub mod watch;

// Re-export commonly used types
pub use build::{BuildLayout, BuildReport, Orchestrator, Transfer, TransferKind};
pub use config::Config;
pub use encoder::{EncodeError, Encoder, RunKeys, DEFAULT_CHUNK_WIDTH};
pub use error::{Error, Result};
pub use header::{render_header, HeaderResolver, HeaderRule, DIRECTIVE_FILE};
pub use minifier::{Minifier, PhpStripper, Stripper};
pub use obfuscator::{DirectoryReport, Obfuscator};
pub use path_utils::{dir_key, normalize_path, path_to_string, path_with_suffix, pathbuf_with_suffix};
pub use script::ScriptSource;
pub use watch::watch;
