//! Configuration schema for listcache
//!
//! Configuration is read from `/etc/listcache.toml` when present. Every
//! field falls back to the compiled-in dpkg layout.

use crate::store::Backend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory dpkg keeps its per-package file lists in
pub const DEFAULT_SOURCE_DIR: &str = "/var/lib/dpkg/info";

/// Suffix shared by every cached file
pub const DEFAULT_SOURCE_SUFFIX: &str = ".list";

/// Where the cache store lives
pub const DEFAULT_STORE_PATH: &str = "/var/lib/dpkg/listcache.db";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which files are cached
    pub source: SourceConfig,

    /// Cache store settings
    pub store: StoreConfig,

    /// Diagnostics
    pub log: LogConfig,
}

/// Source file set settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Directory holding the cached files (not searched recursively)
    pub dir: PathBuf,

    /// Filename suffix, including the leading dot
    pub suffix: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            suffix: DEFAULT_SOURCE_SUFFIX.to_string(),
        }
    }
}

/// Cache store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Storage engine
    pub backend: Backend,

    /// Store file path
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            path: PathBuf::from(DEFAULT_STORE_PATH),
        }
    }
}

/// Logging settings for the preload library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive, overridden by `LISTCACHE_LOG`
    pub filter: String,

    /// Line format on stderr: "text" or "json"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "listcache=warn".to_string(),
            format: "text".to_string(),
        }
    }
}
