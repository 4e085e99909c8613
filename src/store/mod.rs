//! Persistent key → content stores
//!
//! A store maps a file path to an exact byte copy of that file. Two
//! engines implement the same [`CacheStore`] contract:
//!
//! | Backend | File | Failed rebuild leaves |
//! |---------|------|-----------------------|
//! | `sqlite` | single-table database | previous contents (rolled back) |
//! | `hashlog` | append-only record log | an empty store |
//!
//! Callers must only rely on the weaker guarantee: after a failed rebuild
//! the store is either unchanged or empty, never partially written.

pub mod hashlog;
pub mod lock;
pub mod sqlite;

pub use hashlog::HashLogStore;
pub use sqlite::SqliteStore;

use crate::error::{CacheError, CacheResult};
use crate::source::SourceSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How a store handle was opened; `ReadWrite` satisfies `ReadOnly`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessLevel {
    ReadOnly,
    ReadWrite,
}

/// Available storage engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Relational table in an SQLite database
    Sqlite,
    /// Log-structured hash table
    #[value(name = "hashlog")]
    HashLog,
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::HashLog => "hashlog",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of a rebuild, reported to an optional observer
#[derive(Debug, Clone, Copy)]
pub struct RebuildStep<'a> {
    /// 1-based index of the file being indexed
    pub index: usize,
    pub total: usize,
    pub path: &'a Path,
}

/// Abstract cache store interface
///
/// Handles are opened lazily; every data operation opens at the level it
/// needs. Backends implement the primitives, the bulk rebuild is shared.
pub trait CacheStore: Send {
    fn backend(&self) -> Backend;

    /// Location of the persisted store
    fn path(&self) -> &Path;

    /// Open or upgrade the handle
    ///
    /// No-op when the held level already satisfies `level`.
    fn open(&mut self, level: AccessLevel) -> CacheResult<()>;

    /// Currently held access level, `None` when closed
    fn access_level(&self) -> Option<AccessLevel>;

    /// Latest content for an exact filename, or `None` on a miss
    fn read(&mut self, filename: &Path) -> CacheResult<Option<Vec<u8>>>;

    /// Insert or replace the entry for `filename`
    fn write(&mut self, filename: &Path, content: &[u8]) -> CacheResult<()>;

    /// Remove the entry if present
    fn delete(&mut self, filename: &Path) -> CacheResult<()>;

    /// Number of entries
    fn len(&mut self) -> CacheResult<usize>;

    /// Clear every entry and start a bulk transaction
    fn begin_rebuild(&mut self) -> CacheResult<()>;

    /// Make the bulk transaction durable
    fn commit_rebuild(&mut self) -> CacheResult<()>;

    /// Abandon the bulk transaction (backend-defined rollback)
    fn abort_rebuild(&mut self);

    /// Release everything; safe when never opened
    fn close(&mut self);

    fn is_empty(&mut self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Read `path` from disk and upsert it
    fn write_file(&mut self, path: &Path) -> CacheResult<()> {
        let content =
            fs::read(path).map_err(|e| CacheError::io(format!("reading {}", path.display()), e))?;
        self.write(path, &content)
    }

    /// Replace the whole store with the current source set
    ///
    /// Returns the number of files indexed. Any failure aborts the bulk
    /// transaction; the handle stays open so callers can retry.
    fn rebuild(
        &mut self,
        sources: &SourceSet,
        observer: Option<&mut dyn FnMut(RebuildStep<'_>)>,
    ) -> CacheResult<usize> {
        self.open(AccessLevel::ReadWrite)?;
        let members = sources.members()?;
        let total = members.len();

        self.begin_rebuild()?;
        let mut observer = observer;
        for (i, path) in members.iter().enumerate() {
            if let Some(observe) = observer.as_deref_mut() {
                observe(RebuildStep {
                    index: i + 1,
                    total,
                    path,
                });
            }
            if let Err(e) = self.write_file(path) {
                warn!("Rebuild of {} failed at {}: {}", self.path().display(), path.display(), e);
                self.abort_rebuild();
                return Err(CacheError::Rebuild {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
        self.commit_rebuild()?;

        info!("{} list files cached in {}", total, self.path().display());
        Ok(total)
    }
}

/// Create an unopened store for `backend` at `path`
pub fn create_store(backend: Backend, path: PathBuf) -> Box<dyn CacheStore> {
    match backend {
        Backend::Sqlite => Box::new(SqliteStore::new(path)),
        Backend::HashLog => Box::new(HashLogStore::new(path)),
    }
}

/// Key bytes for a filename; paths are opaque byte strings on unix
pub(crate) fn key_bytes(filename: &Path) -> &[u8] {
    filename.as_os_str().as_bytes()
}

/// Run `attempt`, deleting the store file and retrying once if it fails
///
/// Lock conflicts are never healed: the other process owns the file. Only
/// read-write opens may heal, a reader has no business deleting the store.
pub(crate) fn open_with_self_heal<F>(
    backend: Backend,
    path: &Path,
    level: AccessLevel,
    mut attempt: F,
) -> CacheResult<()>
where
    F: FnMut() -> CacheResult<()>,
{
    let first = match attempt() {
        Ok(()) => return Ok(()),
        Err(e @ CacheError::StoreLocked(_)) => return Err(e),
        Err(e) => e,
    };

    if level == AccessLevel::ReadOnly {
        return Err(CacheError::StoreOpen {
            backend: backend.name(),
            path: path.to_path_buf(),
            reason: first.to_string(),
        });
    }

    warn!(
        "Cache store {} unusable ({}), recreating",
        path.display(),
        first
    );
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!("Could not remove {}: {}", path.display(), e);
        }
    }

    attempt().map_err(|e| match e {
        CacheError::StoreLocked(p) => CacheError::StoreLocked(p),
        other => CacheError::StoreOpen {
            backend: backend.name(),
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    })
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every backend must share, run once per engine

    use super::*;
    use tempfile::TempDir;

    pub fn source_dir(files: &[(&str, &[u8])]) -> (TempDir, SourceSet) {
        let dir = TempDir::new().unwrap();
        let info = dir.path().join("info");
        fs::create_dir(&info).unwrap();
        for (name, content) in files {
            fs::write(info.join(name), content).unwrap();
        }
        let set = SourceSet::new(info, ".list");
        (dir, set)
    }

    pub fn write_then_read(store: &mut dyn CacheStore) {
        let key = Path::new("/var/lib/dpkg/info/bash.list");
        let content = b"/.\n/bin\n/bin/bash\n\x00\xff binary too";

        store.write(key, content).unwrap();
        assert_eq!(store.read(key).unwrap().as_deref(), Some(&content[..]));
        assert_eq!(store.read(Path::new("/var/lib/dpkg/info/zsh.list")).unwrap(), None);
    }

    pub fn upsert_replaces(store: &mut dyn CacheStore) {
        let key = Path::new("/info/a.list");
        store.write(key, b"old").unwrap();
        store.write(key, b"new").unwrap();

        assert_eq!(store.read(key).unwrap().as_deref(), Some(&b"new"[..]));
        assert_eq!(store.len().unwrap(), 1);
    }

    pub fn delete_is_idempotent(store: &mut dyn CacheStore) {
        let key = Path::new("/info/a.list");
        store.write(key, b"abc").unwrap();
        store.delete(key).unwrap();
        store.delete(key).unwrap();

        assert_eq!(store.read(key).unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    pub fn empty_content_is_a_hit(store: &mut dyn CacheStore) {
        let key = Path::new("/info/empty.list");
        store.write(key, b"").unwrap();
        assert_eq!(store.read(key).unwrap(), Some(Vec::new()));
    }

    pub fn rebuild_is_complete(store: &mut dyn CacheStore) {
        let (_dir, set) =
            source_dir(&[("A.list", b"abc"), ("B.list", b"xy"), ("A.md5sums", b"no")]);
        store.write(Path::new("/elsewhere/stale.list"), b"gone").unwrap();

        let mut seen = Vec::new();
        let mut observe = |step: RebuildStep<'_>| seen.push((step.index, step.total));
        let count = store.rebuild(&set, Some(&mut observe)).unwrap();

        assert_eq!(count, 2);
        assert_eq!(seen, vec![(1, 2), (2, 2)]);
        for member in set.members().unwrap() {
            assert_eq!(store.read(&member).unwrap(), Some(fs::read(&member).unwrap()));
        }
        assert_eq!(store.read(&set.dir().join("A.md5sums")).unwrap(), None);
        assert_eq!(store.read(Path::new("/elsewhere/stale.list")).unwrap(), None);
        assert_eq!(store.len().unwrap(), 2);
    }

    /// A failed rebuild leaves the store unchanged or empty
    pub fn failed_rebuild_is_not_partial(store: &mut dyn CacheStore) {
        let (_dir, set) = source_dir(&[("a.list", b"a"), ("b.list", b"b"), ("c.list", b"c")]);
        store.rebuild(&set, None).unwrap();
        store.write(Path::new("/outside/keep.list"), b"kept").unwrap();

        // b.list vanishes after enumeration, so the second write fails
        let victim = set.dir().join("b.list");
        let mut sabotage = |step: RebuildStep<'_>| {
            if step.index == 2 {
                fs::remove_file(&victim).unwrap();
            }
        };
        let err = store.rebuild(&set, Some(&mut sabotage)).unwrap_err();
        assert!(matches!(err, CacheError::Rebuild { .. }));

        let len = store.len().unwrap();
        if len == 0 {
            assert_eq!(store.read(&set.dir().join("a.list")).unwrap(), None);
        } else {
            assert_eq!(len, 4);
            assert_eq!(
                store.read(&set.dir().join("a.list")).unwrap().as_deref(),
                Some(&b"a"[..])
            );
            assert_eq!(
                store.read(Path::new("/outside/keep.list")).unwrap().as_deref(),
                Some(&b"kept"[..])
            );
        }

        // and the handle is still usable
        fs::write(&victim, b"b2").unwrap();
        assert_eq!(store.rebuild(&set, None).unwrap(), 3);
    }

    pub fn close_then_reopen_persists(store: &mut dyn CacheStore) {
        let key = Path::new("/info/persist.list");
        store.write(key, b"durable").unwrap();
        store.close();
        store.close();
        assert_eq!(store.access_level(), None);

        assert_eq!(store.read(key).unwrap().as_deref(), Some(&b"durable"[..]));
        assert_eq!(store.access_level(), Some(AccessLevel::ReadOnly));
    }

    pub fn open_upgrades_but_never_downgrades(store: &mut dyn CacheStore) {
        store.open(AccessLevel::ReadWrite).unwrap();
        store.open(AccessLevel::ReadOnly).unwrap();
        assert_eq!(store.access_level(), Some(AccessLevel::ReadWrite));
    }
}
