//! Non-blocking advisory locks on store files
//!
//! Writers take an exclusive `flock`, readers a shared one. Neither ever
//! waits: a conflicting holder surfaces as `CacheError::StoreLocked` so the
//! caller can fall back to uncached I/O instead of stalling dpkg.

use crate::error::{CacheError, CacheResult};
use crate::store::AccessLevel;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held advisory lock; released when dropped
#[derive(Debug)]
pub struct StoreLock {
    // flock is tied to the open file description, closing it unlocks
    _file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Lock an already-open file
    pub fn acquire(file: File, path: &Path, level: AccessLevel) -> CacheResult<Self> {
        let op = match level {
            AccessLevel::ReadOnly => libc::LOCK_SH,
            AccessLevel::ReadWrite => libc::LOCK_EX,
        };

        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let rc = unsafe { libc::flock(file.as_raw_fd(), op | libc::LOCK_NB) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(CacheError::StoreLocked(path.to_path_buf()));
            }
            return Err(CacheError::io(format!("locking {}", path.display()), err));
        }

        debug!("Locked {} ({:?})", path.display(), level);
        Ok(Self {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
