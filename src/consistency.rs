//! Store freshness and rebuild policy
//!
//! The engine owns the store and decides when its contents can no longer be
//! trusted:
//!
//! - on first access, the store is rebuilt if it is missing or older than
//!   any source file;
//! - on a read miss for a file that exists on disk, the store is rebuilt
//!   once and the read retried.
//!
//! It only relies on the weaker rebuild guarantee shared by all backends: a
//! failed rebuild leaves the store unchanged or empty.

use crate::error::{CacheError, CacheResult};
use crate::source::{self, SourceSet};
use crate::store::{CacheStore, RebuildStep};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// Why a store needs rebuilding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The store file does not exist or cannot be statted
    Missing,
    /// A source file was modified after the store
    NewerSource(PathBuf),
}

/// Result of the first-access check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Rebuilt { reason: StaleReason, files: usize },
}

/// Snapshot of the store for diagnostics
#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub backend: &'static str,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
    pub entries: Option<usize>,
    pub sources: usize,
    pub stale: Option<StaleReason>,
}

/// Store plus the policy keeping it in step with the source set
pub struct ConsistencyEngine {
    store: Box<dyn CacheStore>,
    sources: SourceSet,
    checked: bool,
    rebuilds: usize,
    // paths that already cost one miss-triggered rebuild
    retried: HashSet<PathBuf>,
}

impl ConsistencyEngine {
    pub fn new(store: Box<dyn CacheStore>, sources: SourceSet) -> Self {
        Self {
            store,
            sources,
            checked: false,
            rebuilds: 0,
            retried: HashSet::new(),
        }
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    pub fn store(&self) -> &dyn CacheStore {
        self.store.as_ref()
    }

    /// Number of rebuilds performed by this engine
    pub fn rebuilds(&self) -> usize {
        self.rebuilds
    }

    /// Compare the store's mtime with every source file
    ///
    /// Stops at the first newer source. Members vanishing mid-scan are
    /// skipped; any other stat failure is a scan error.
    pub fn staleness(&self) -> CacheResult<Option<StaleReason>> {
        let store_time = match source::modified(self.store.path()) {
            Ok(time) => time,
            Err(e) => {
                debug!("Cannot stat store {}: {}", self.store.path().display(), e);
                return Ok(Some(StaleReason::Missing));
            }
        };

        for member in self.sources.members()? {
            let member_time = match source::modified(&member) {
                Ok(time) => time,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(CacheError::SourceScan {
                        pattern: self.sources.pattern(),
                        reason: format!("cannot stat {}: {}", member.display(), e),
                    })
                }
            };
            if member_time > store_time {
                return Ok(Some(StaleReason::NewerSource(member)));
            }
        }
        Ok(None)
    }

    /// First-access check; later calls are no-ops
    pub fn ensure_fresh(&mut self) -> CacheResult<Freshness> {
        if self.checked {
            return Ok(Freshness::Fresh);
        }

        let freshness = match self.staleness()? {
            None => Freshness::Fresh,
            Some(reason) => {
                info!("Cache {} is stale ({:?}), rebuilding", self.store.path().display(), reason);
                let files = self.rebuild(None)?;
                Freshness::Rebuilt { reason, files }
            }
        };
        self.checked = true;
        Ok(freshness)
    }

    /// Full rebuild from the source set
    pub fn rebuild(
        &mut self,
        observer: Option<&mut dyn FnMut(RebuildStep<'_>)>,
    ) -> CacheResult<usize> {
        self.rebuilds += 1;
        let files = self.store.rebuild(&self.sources, observer)?;
        self.checked = true;
        Ok(files)
    }

    /// Cached content for `path`, rebuilding once on a miss
    ///
    /// `Ok(None)` means the caller should use real I/O for this one call.
    /// A failed rebuild is returned as an error and is fatal to the cache.
    pub fn lookup(&mut self, path: &Path) -> CacheResult<Option<Vec<u8>>> {
        self.ensure_fresh()?;
        if let Some(content) = self.store.read(path)? {
            return Ok(Some(content));
        }

        // no rebuild can produce a file that is not on disk
        if !path.exists() {
            debug!("{} not on disk, nothing to cache", path.display());
            return Ok(None);
        }
        if !self.retried.insert(path.to_path_buf()) {
            debug!("{} still missing after a rebuild, not retrying", path.display());
            return Ok(None);
        }

        info!("{} not up-to-date in cache, rebuilding", path.display());
        self.rebuild(None)?;

        let retry = self.store.read(path)?;
        if retry.is_none() {
            debug!("{} is not being indexed", path.display());
        }
        Ok(retry)
    }

    /// Store the current on-disk content of a newly published file
    pub fn publish(&mut self, path: &Path) -> CacheResult<()> {
        self.ensure_fresh()
            .and_then(|_| self.store.write_file(path))
            .map_err(|e| CacheError::IncrementalUpdate {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!("Updated cache entry for {}", path.display());
        Ok(())
    }

    /// Drop the entry of a removed file
    pub fn remove(&mut self, path: &Path) -> CacheResult<()> {
        self.ensure_fresh()
            .and_then(|_| self.store.delete(path))
            .map_err(|e| CacheError::IncrementalUpdate {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!("Removed cache entry for {}", path.display());
        Ok(())
    }

    /// Content for `path` without any rebuild
    pub fn peek(&mut self, path: &Path) -> CacheResult<Option<Vec<u8>>> {
        self.store.read(path)
    }

    /// Diagnostics snapshot; never rebuilds
    pub fn status(&mut self) -> CacheResult<StoreStatus> {
        let path = self.store.path().to_path_buf();
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
        let sources = self.sources.members()?.len();
        let stale = self.staleness()?;
        let entries = if modified.is_some() {
            Some(self.store.len()?)
        } else {
            None
        };

        Ok(StoreStatus {
            backend: self.store.backend().name(),
            path,
            modified,
            entries,
            sources,
            stale,
        })
    }

    pub fn close(&mut self) {
        self.store.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{create_store, AccessLevel, Backend};
    use std::time::Duration;
    use tempfile::TempDir;

    const BACKENDS: [Backend; 2] = [Backend::Sqlite, Backend::HashLog];

    struct Fixture {
        _dir: TempDir,
        info: PathBuf,
        store_path: PathBuf,
    }

    impl Fixture {
        fn new(files: &[(&str, &[u8])]) -> Self {
            let dir = TempDir::new().unwrap();
            let info = dir.path().join("info");
            fs::create_dir(&info).unwrap();
            for (name, content) in files {
                fs::write(info.join(name), content).unwrap();
            }
            let store_path = dir.path().join("listcache.db");
            Self {
                _dir: dir,
                info,
                store_path,
            }
        }

        fn engine(&self, backend: Backend) -> ConsistencyEngine {
            ConsistencyEngine::new(
                create_store(backend, self.store_path.clone()),
                SourceSet::new(&self.info, ".list"),
            )
        }

        fn set_mtime(&self, path: &Path, time: SystemTime) {
            let file = fs::File::options().write(true).open(path).unwrap();
            file.set_modified(time).unwrap();
        }
    }

    #[test]
    fn missing_store_is_rebuilt_on_first_access() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc")]);
            let mut engine = fx.engine(backend);

            let freshness = engine.ensure_fresh().unwrap();
            assert_eq!(
                freshness,
                Freshness::Rebuilt {
                    reason: StaleReason::Missing,
                    files: 1
                }
            );
            assert_eq!(engine.ensure_fresh().unwrap(), Freshness::Fresh);
            assert_eq!(engine.rebuilds(), 1);
        }
    }

    #[test]
    fn newer_source_triggers_exactly_one_rebuild() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc"), ("B.list", b"xy")]);
            fx.engine(backend).rebuild(None).unwrap();

            let now = SystemTime::now();
            fx.set_mtime(&fx.info.join("A.list"), now - Duration::from_secs(120));
            fx.set_mtime(&fx.store_path, now - Duration::from_secs(60));
            fs::write(fx.info.join("B.list"), b"xyz").unwrap();
            fx.set_mtime(&fx.info.join("B.list"), now);

            let mut engine = fx.engine(backend);
            assert_eq!(
                engine.staleness().unwrap(),
                Some(StaleReason::NewerSource(fx.info.join("B.list")))
            );
            assert_eq!(
                engine.lookup(&fx.info.join("B.list")).unwrap().as_deref(),
                Some(&b"xyz"[..])
            );
            assert_eq!(
                engine.lookup(&fx.info.join("A.list")).unwrap().as_deref(),
                Some(&b"abc"[..])
            );
            assert_eq!(engine.rebuilds(), 1);
        }
    }

    #[test]
    fn fresh_store_is_not_rebuilt() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc")]);
            let past = SystemTime::now() - Duration::from_secs(120);
            fx.set_mtime(&fx.info.join("A.list"), past);
            fx.engine(backend).rebuild(None).unwrap();

            let mut engine = fx.engine(backend);
            assert_eq!(engine.ensure_fresh().unwrap(), Freshness::Fresh);
            assert_eq!(engine.rebuilds(), 0);
        }
    }

    #[test]
    fn miss_rebuilds_once_then_retries() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc")]);
            let mut engine = fx.engine(backend);
            engine.ensure_fresh().unwrap();

            // appears without touching the store's view of freshness
            fs::write(fx.info.join("C.list"), b"z").unwrap();
            assert_eq!(
                engine.lookup(&fx.info.join("C.list")).unwrap().as_deref(),
                Some(&b"z"[..])
            );
            assert_eq!(engine.rebuilds(), 2);
        }
    }

    #[test]
    fn miss_outside_source_set_falls_through_after_one_rebuild() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc")]);
            let outside = fx.info.join("A.md5sums");
            fs::write(&outside, b"sum").unwrap();
            let mut engine = fx.engine(backend);

            assert_eq!(engine.lookup(&outside).unwrap(), None);
            assert_eq!(engine.lookup(&outside).unwrap(), None);
            assert_eq!(engine.rebuilds(), 2, "first access plus one miss rebuild");
        }
    }

    #[test]
    fn miss_for_absent_file_never_rebuilds() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc")]);
            let mut engine = fx.engine(backend);
            engine.ensure_fresh().unwrap();

            assert_eq!(engine.lookup(&fx.info.join("ghost.list")).unwrap(), None);
            assert_eq!(engine.rebuilds(), 1);
        }
    }

    #[test]
    fn scan_failure_is_fatal() {
        let fx = Fixture::new(&[]);
        fs::remove_dir(&fx.info).unwrap();
        fs::write(&fx.store_path, b"").unwrap();

        let mut engine = fx.engine(Backend::HashLog);
        let err = engine.ensure_fresh().unwrap_err();
        assert!(matches!(err, CacheError::SourceScan { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn publish_and_remove_are_incremental() {
        for backend in BACKENDS {
            let fx = Fixture::new(&[("A.list", b"abc")]);
            let mut engine = fx.engine(backend);
            engine.ensure_fresh().unwrap();

            let c = fx.info.join("C.list");
            fs::write(&c, b"z").unwrap();
            engine.publish(&c).unwrap();
            assert_eq!(engine.peek(&c).unwrap().as_deref(), Some(&b"z"[..]));

            engine.remove(&fx.info.join("A.list")).unwrap();
            assert_eq!(engine.peek(&fx.info.join("A.list")).unwrap(), None);
            assert_eq!(engine.rebuilds(), 1);
        }
    }

    #[test]
    fn publish_of_unreadable_file_is_incremental_error() {
        let fx = Fixture::new(&[("A.list", b"abc")]);
        let mut engine = fx.engine(Backend::Sqlite);
        engine.ensure_fresh().unwrap();

        let err = engine.publish(&fx.info.join("vanished.list")).unwrap_err();
        assert!(matches!(err, CacheError::IncrementalUpdate { .. }));
    }

    #[test]
    fn status_reports_without_rebuilding() {
        let fx = Fixture::new(&[("A.list", b"abc"), ("B.list", b"xy")]);
        let mut engine = fx.engine(Backend::Sqlite);

        let before = engine.status().unwrap();
        assert_eq!(before.sources, 2);
        assert_eq!(before.entries, None);
        assert_eq!(before.stale, Some(StaleReason::Missing));

        engine.rebuild(None).unwrap();
        engine.close();
        let after = engine.status().unwrap();
        assert_eq!(after.entries, Some(2));
        assert_eq!(after.backend, "sqlite");
        assert_eq!(engine.store().access_level(), Some(AccessLevel::ReadOnly));
    }
}
