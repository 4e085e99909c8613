//! SQLite-backed cache store
//!
//! One table, `files(filename, contents)`, keyed by the raw path bytes.
//! Rebuilds run inside a single transaction and roll back cleanly.

use crate::error::{CacheError, CacheResult};
use crate::store::lock::StoreLock;
use crate::store::{key_bytes, open_with_self_heal, AccessLevel, Backend, CacheStore};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS files (
    filename BLOB PRIMARY KEY ON CONFLICT REPLACE,
    contents BLOB NOT NULL
)";
const READ_FILE_SQL: &str = "SELECT contents FROM files WHERE filename = ?1";
const INSERT_FILE_SQL: &str = "INSERT INTO files (filename, contents) VALUES (?1, ?2)";
const DELETE_FILE_SQL: &str = "DELETE FROM files WHERE filename = ?1";

struct Handle {
    conn: Connection,
    level: AccessLevel,
    _lock: Option<StoreLock>,
}

/// Relational cache store
pub struct SqliteStore {
    path: PathBuf,
    handle: Option<Handle>,
    in_rebuild: bool,
}

impl SqliteStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            handle: None,
            in_rebuild: false,
        }
    }

    /// Sidecar file carrying the advisory lock
    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn lock(&self, level: AccessLevel) -> CacheResult<Option<StoreLock>> {
        let lock_path = self.lock_path();
        let file = match level {
            AccessLevel::ReadWrite => OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path),
            AccessLevel::ReadOnly => OpenOptions::new().read(true).open(&lock_path),
        };

        match file {
            Ok(file) => StoreLock::acquire(file, &lock_path, level).map(Some),
            // No writer has ever run, nothing to coordinate with
            Err(e)
                if level == AccessLevel::ReadOnly && e.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(None)
            }
            Err(e) => Err(CacheError::io(format!("opening {}", lock_path.display()), e)),
        }
    }

    fn connect(&self, level: AccessLevel) -> CacheResult<Connection> {
        let flags = match level {
            AccessLevel::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            AccessLevel::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        } | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let context = format!("opening {}", self.path.display());
        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|e| CacheError::sqlite(context.clone(), e))?;
        conn.busy_timeout(Duration::ZERO)
            .map_err(|e| CacheError::sqlite(context.clone(), e))?;

        if level == AccessLevel::ReadWrite {
            // rollback journal: commits touch the main file, keeping its mtime honest
            conn.pragma_update(None, "journal_mode", "DELETE")
                .map_err(|e| CacheError::sqlite(context.clone(), e))?;
            conn.execute(CREATE_TABLE_SQL, [])
                .map_err(|e| CacheError::sqlite(context.clone(), e))?;
        }

        // Detects a file that is not a database at all
        conn.prepare_cached(READ_FILE_SQL)
            .map_err(|e| CacheError::sqlite(context, e))?;
        Ok(conn)
    }

    fn conn(&mut self, level: AccessLevel) -> CacheResult<&Connection> {
        self.open(level)?;
        match self.handle.as_ref() {
            Some(handle) => Ok(&handle.conn),
            None => Err(CacheError::StoreOpen {
                backend: Backend::Sqlite.name(),
                path: self.path.clone(),
                reason: "handle not open".to_string(),
            }),
        }
    }

    fn sql_error(&self, what: &str, e: rusqlite::Error) -> CacheError {
        CacheError::sqlite(format!("{} in {}", what, self.path.display()), e)
    }
}

impl CacheStore for SqliteStore {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self, level: AccessLevel) -> CacheResult<()> {
        if self.access_level().is_some_and(|held| held >= level) {
            return Ok(());
        }
        self.close();

        let lock = self.lock(level)?;
        let mut conn = None;
        open_with_self_heal(Backend::Sqlite, &self.path, level, || {
            conn = Some(self.connect(level)?);
            Ok(())
        })?;

        if let Some(conn) = conn {
            debug!("Opened sqlite store {} ({:?})", self.path.display(), level);
            self.handle = Some(Handle {
                conn,
                level,
                _lock: lock,
            });
        }
        Ok(())
    }

    fn access_level(&self) -> Option<AccessLevel> {
        self.handle.as_ref().map(|h| h.level)
    }

    fn read(&mut self, filename: &Path) -> CacheResult<Option<Vec<u8>>> {
        let conn = self.conn(AccessLevel::ReadOnly)?;
        let result = conn
            .prepare_cached(READ_FILE_SQL)
            .and_then(|mut stmt| {
                stmt.query_row(params![key_bytes(filename)], |row| row.get::<_, Vec<u8>>(0))
                    .optional()
            });
        result.map_err(|e| self.sql_error("reading entry", e))
    }

    fn write(&mut self, filename: &Path, content: &[u8]) -> CacheResult<()> {
        let conn = self.conn(AccessLevel::ReadWrite)?;
        // outside a rebuild every statement autocommits, which is the flush
        let result = conn
            .prepare_cached(INSERT_FILE_SQL)
            .and_then(|mut stmt| stmt.execute(params![key_bytes(filename), content]));
        result
            .map(|_| ())
            .map_err(|e| self.sql_error("writing entry", e))
    }

    fn delete(&mut self, filename: &Path) -> CacheResult<()> {
        let conn = self.conn(AccessLevel::ReadWrite)?;
        let result = conn
            .prepare_cached(DELETE_FILE_SQL)
            .and_then(|mut stmt| stmt.execute(params![key_bytes(filename)]));
        result
            .map(|_| ())
            .map_err(|e| self.sql_error("deleting entry", e))
    }

    fn len(&mut self) -> CacheResult<usize> {
        let conn = self.conn(AccessLevel::ReadOnly)?;
        let result = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get::<_, i64>(0));
        result
            .map(|n| n as usize)
            .map_err(|e| self.sql_error("counting entries", e))
    }

    fn begin_rebuild(&mut self) -> CacheResult<()> {
        let conn = self.conn(AccessLevel::ReadWrite)?;
        // the delete sits inside the transaction so an abort restores it
        let result = conn.execute_batch("BEGIN IMMEDIATE; DELETE FROM files;");
        if let Err(e) = result {
            if let Some(handle) = self.handle.as_ref() {
                if !handle.conn.is_autocommit() {
                    let _ = handle.conn.execute_batch("ROLLBACK;");
                }
            }
            return Err(self.sql_error("starting rebuild", e));
        }
        self.in_rebuild = true;
        Ok(())
    }

    fn commit_rebuild(&mut self) -> CacheResult<()> {
        self.in_rebuild = false;
        let conn = self.conn(AccessLevel::ReadWrite)?;
        let result = conn.execute_batch("COMMIT;");
        result.map_err(|e| self.sql_error("committing rebuild", e))
    }

    fn abort_rebuild(&mut self) {
        if !self.in_rebuild {
            return;
        }
        self.in_rebuild = false;
        if let Some(handle) = self.handle.as_ref() {
            if let Err(e) = handle.conn.execute_batch("ROLLBACK;") {
                debug!("Rollback of {} failed: {}", self.path.display(), e);
            }
        }
    }

    fn close(&mut self) {
        self.abort_rebuild();
        if let Some(handle) = self.handle.take() {
            if let Err((_, e)) = handle.conn.close() {
                debug!("Closing {} failed: {}", self.path.display(), e);
            }
            debug!("Closed sqlite store {}", self.path.display());
        }
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        self.close();
    }
}
