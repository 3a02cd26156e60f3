//! Build configuration
//!
//! A flat key/value store loaded from `config/config.yaml`. Lookups never fail:
//! missing keys read as an empty string and the typed accessors fall back to
//! their defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::encoder::DEFAULT_CHUNK_WIDTH;
use crate::error::{Error, Result};

/// Directory (relative to the base path) holding the configuration file
pub const CONFIG_DIR: &str = "config";

/// Name of the configuration file
pub const CONFIG_FILE: &str = "config.yaml";

pub const KEY_SOURCE_DIR: &str = "sourceDir";
pub const KEY_TARGET_DIR: &str = "targetDir";
pub const KEY_TEMP_DIR: &str = "tempDir";
pub const KEY_ROUNDS: &str = "cntEncode";
pub const KEY_CHUNK_WIDTH: &str = "chunkWidth";
pub const KEY_PHP_BINARY: &str = "phpBinary";

const DEFAULT_PHP_BINARY: &str = "php";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    values: BTreeMap<String, Value>,
}

impl Config {
    /// Parse configuration from YAML text
    pub fn from_yaml(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        // An empty document parses as null
        let config: Option<Config> = serde_yaml::from_str(text)?;
        Ok(config.unwrap_or_default())
    }

    /// Load configuration from a file.
    ///
    /// Only `.yaml` resources are understood; any other extension yields an
    /// empty configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            tracing::warn!("Ignoring non-yaml config resource: {}", path.display());
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&text).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Default config location under a base path
    pub fn default_path(base: &Path) -> PathBuf {
        base.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Locate and load `config/config.yaml` under `base`
    pub fn locate(base: &Path) -> Result<Self> {
        let path = Self::default_path(base);
        if !path.is_file() {
            return Err(Error::Configuration(format!(
                "Config not found: {}",
                path.display()
            )));
        }
        Self::from_file(&path)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Read a value as text; missing or non-scalar values read as ""
    pub fn get(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// Override a value for the lifetime of this instance
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Number of encode rounds; absent or invalid values mean 0
    pub fn rounds(&self) -> u32 {
        match self.values.get(KEY_ROUNDS) {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn chunk_width(&self) -> usize {
        match self.values.get(KEY_CHUNK_WIDTH) {
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CHUNK_WIDTH),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .ok()
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_CHUNK_WIDTH),
            _ => DEFAULT_CHUNK_WIDTH,
        }
    }

    pub fn php_binary(&self) -> String {
        let binary = self.get(KEY_PHP_BINARY);
        if binary.is_empty() {
            DEFAULT_PHP_BINARY.to_string()
        } else {
            binary
        }
    }

    /// Resolve a configured directory against the base path
    pub fn dir(&self, base: &Path, key: &str) -> PathBuf {
        let value = self.get(key);
        let relative = value.trim_start_matches(['/', '\\']);
        if relative.is_empty() {
            base.to_path_buf()
        } else {
            base.join(relative)
        }
    }
}
