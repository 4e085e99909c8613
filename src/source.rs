//! The set of on-disk files eligible for caching
//!
//! A source set is one directory plus a filename suffix, e.g.
//! `/var/lib/dpkg/info/*.list`. Membership is decided purely from the path
//! bytes, so names that are not UTF-8 are members too.

use crate::config::schema::SourceConfig;
use crate::error::{CacheError, CacheResult};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Directory + suffix pattern identifying cacheable files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    dir: PathBuf,
    suffix: String,
}

impl SourceSet {
    pub fn new(dir: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.dir.clone(), config.suffix.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Glob pattern for display and enumeration
    pub fn pattern(&self) -> String {
        let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        format!(
            "{}/*{}",
            dir.trim_end_matches('/'),
            glob::Pattern::escape(&self.suffix)
        )
    }

    /// Whether `path` names a direct child of the directory with the suffix
    ///
    /// Hidden files, including a bare suffix (`/dir/.list`), are never members.
    pub fn contains(&self, path: &Path) -> bool {
        if path.parent() != Some(self.dir.as_path()) {
            return false;
        }
        let Some(name) = path.file_name().map(OsStrExt::as_bytes) else {
            return false;
        };
        let suffix = self.suffix.as_bytes();
        !name.starts_with(b".") && name.len() > suffix.len() && name.ends_with(suffix)
    }

    /// Enumerate current members, sorted by path
    ///
    /// A missing directory is a scan failure; an empty one is an empty set.
    pub fn members(&self) -> CacheResult<Vec<PathBuf>> {
        let pattern = self.pattern();
        if !self.dir.is_dir() {
            return Err(CacheError::SourceScan {
                pattern,
                reason: "directory does not exist".to_string(),
            });
        }

        let scan_failed = |e: std::io::Error| CacheError::SourceScan {
            pattern: pattern.clone(),
            reason: e.to_string(),
        };

        // glob::glob drops names that are not UTF-8
        let mut members = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(scan_failed)? {
            let path = entry.map_err(scan_failed)?.path();
            if self.contains(&path) && path.is_file() {
                members.push(path);
            }
        }
        members.sort();

        debug!("{} source files match {}", members.len(), pattern);
        Ok(members)
    }
}

/// Last modification time of a file
pub fn modified(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}
