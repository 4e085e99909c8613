//! Error types for listcache
//!
//! All modules use `CacheResult<T>` as their return type. None of these
//! errors ever reach a program running under the preload library: the
//! interceptor turns them into a disabled cache and falls back to real I/O.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for listcache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// All errors that can occur in listcache
#[derive(Error, Debug)]
pub enum CacheError {
    // Store errors
    #[error("Cannot open {backend} cache store at {path}: {reason}")]
    StoreOpen {
        backend: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Cache store {0} is locked by another process")]
    StoreLocked(PathBuf),

    #[error("Cache store {path} is corrupt: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    #[error("SQLite error: {context}")]
    Sqlite {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    // Consistency errors
    #[error("Cannot enumerate source files matching {pattern}: {reason}")]
    SourceScan { pattern: String, reason: String },

    #[error("Cache rebuild aborted at {path}: {reason}")]
    Rebuild { path: PathBuf, reason: String },

    #[error("Cannot update cache entry for {path}: {reason}")]
    IncrementalUpdate { path: PathBuf, reason: String },

    #[error("No cache entry for {0}")]
    EntryNotFound(PathBuf),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Preload library not found: {0}")]
    LibraryNotFound(PathBuf),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl CacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an SQLite error with context
    pub fn sqlite(context: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Sqlite {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Whether this error leaves the cache unusable for the rest of the process
    ///
    /// A missing entry only affects one call; everything else means the
    /// store can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EntryNotFound(_))
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::StoreLocked(_) => {
                Some("Another dpkg or listcache process is running; retry when it exits")
            }
            Self::StoreOpen { .. } | Self::StoreCorrupt { .. } => {
                Some("Run: listcache rebuild")
            }
            Self::EntryNotFound(_) => Some("Check the path, or run: listcache rebuild"),
            Self::LibraryNotFound(_) => {
                Some("Build it with: cargo build --release --features preload")
            }
            _ => None,
        }
    }
}
