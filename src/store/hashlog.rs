//! Log-structured hash table store
//!
//! Entries are appended to a single file and indexed in memory on open.
//!
//! # File format
//!
//! ```text
//! header:  "LCHL" | version: u32 LE
//! record:  op: u8 | key_len: u32 LE | val_len: u32 LE | key | value | check: [u8; 8]
//! ```
//!
//! `op` is 1 for put and 2 for delete; `check` is the first 8 bytes of the
//! SHA-256 of everything before it in the record. Replay stops at the first
//! torn or mismatching record and writers truncate the tail away.
//!
//! Clearing the store ("vanish") truncates the file back to its header and
//! cannot be undone, so an aborted rebuild leaves the store empty.
//!
//! A writer that opens a log holding more dead bytes (overwritten or deleted
//! records) than live ones compacts it: the live records are written to a
//! sibling file which is renamed over the log. Openers re-check after locking
//! that they still hold the file at the path.

use crate::error::{CacheError, CacheResult};
use crate::store::lock::StoreLock;
use crate::store::{key_bytes, open_with_self_heal, AccessLevel, Backend, CacheStore};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::{FileExt, MetadataExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const MAGIC: &[u8; 4] = b"LCHL";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: u64 = 8;

const OP_PUT: u8 = 1;
const OP_DELETE: u8 = 2;

/// op + key_len + val_len
const RECORD_PREFIX: usize = 9;
const CHECK_LEN: usize = 8;

/// Suffix of the file a compaction writes before renaming it over the log
const COMPACT_SUFFIX: &str = ".compact";

/// Times an open retries after losing the file to a concurrent compaction
const REOPEN_ATTEMPTS: usize = 3;

/// Location of a live value inside the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: u64,
    len: u32,
}

struct Handle {
    // None: read-only open of a store that does not exist yet
    file: Option<File>,
    level: AccessLevel,
    _lock: Option<StoreLock>,
    index: HashMap<Vec<u8>, Slot>,
    end: u64,
}

/// Append-only hash table cache store
pub struct HashLogStore {
    path: PathBuf,
    handle: Option<Handle>,
    in_rebuild: bool,
}

impl HashLogStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            handle: None,
            in_rebuild: false,
        }
    }

    fn corrupt(&self, reason: impl Into<String>) -> CacheError {
        CacheError::StoreCorrupt {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    fn io_error(&self, what: &str, e: io::Error) -> CacheError {
        CacheError::io(format!("{} {}", what, self.path.display()), e)
    }

    /// Open and lock the log; `None` for a read-only open of a missing store
    fn open_locked(&self, level: AccessLevel) -> CacheResult<Option<(File, StoreLock)>> {
        for _ in 0..REOPEN_ATTEMPTS {
            let opened = match level {
                AccessLevel::ReadWrite => OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(&self.path),
                AccessLevel::ReadOnly => OpenOptions::new().read(true).open(&self.path),
            };
            let file = match opened {
                Ok(file) => file,
                Err(e) if level == AccessLevel::ReadOnly && e.kind() == io::ErrorKind::NotFound => {
                    return Ok(None);
                }
                Err(e) => return Err(self.io_error("opening", e)),
            };

            let lock_file = file.try_clone().map_err(|e| self.io_error("locking", e))?;
            let lock = StoreLock::acquire(lock_file, &self.path, level)?;
            if still_linked(&file, &self.path) {
                return Ok(Some((file, lock)));
            }
            debug!("{} was replaced while locking, reopening", self.path.display());
        }
        Err(CacheError::StoreLocked(self.path.clone()))
    }

    fn load(&self, level: AccessLevel) -> CacheResult<Handle> {
        let Some((mut file, lock)) = self.open_locked(level)? else {
            debug!("No hashlog store at {}, treating as empty", self.path.display());
            return Ok(Handle {
                file: None,
                level,
                _lock: None,
                index: HashMap::new(),
                end: HEADER_LEN,
            });
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| self.io_error("reading", e))?;

        if bytes.is_empty() {
            if level == AccessLevel::ReadWrite {
                file.write_all_at(&header(), 0)
                    .and_then(|_| file.sync_data())
                    .map_err(|e| self.io_error("initializing", e))?;
            }
            return Ok(Handle {
                file: Some(file),
                level,
                _lock: Some(lock),
                index: HashMap::new(),
                end: HEADER_LEN,
            });
        }

        check_header(&bytes).map_err(|reason| self.corrupt(reason))?;

        let (index, end) = replay(&bytes);
        if end < bytes.len() as u64 {
            warn!(
                "Discarding {} trailing bytes of {}",
                bytes.len() as u64 - end,
                self.path.display()
            );
            if level == AccessLevel::ReadWrite {
                file.set_len(end)
                    .map_err(|e| self.io_error("truncating", e))?;
            }
        }

        let live = live_bytes(&index);
        let dead = (end - HEADER_LEN).saturating_sub(live);
        if level == AccessLevel::ReadWrite && dead > live {
            match self.compact(&bytes, &index) {
                Ok(handle) => {
                    debug!(
                        "Compacted {} from {} to {} bytes",
                        self.path.display(),
                        end,
                        handle.end
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    warn!("Could not compact {}: {}", self.path.display(), e);
                    let _ = fs::remove_file(compaction_path(&self.path));
                }
            }
        }

        Ok(Handle {
            file: Some(file),
            level,
            _lock: Some(lock),
            index,
            end,
        })
    }

    /// Write the live records of `bytes` to a new file and rename it over the log
    ///
    /// Runs under the exclusive lock of the old file, which the caller drops
    /// once the returned handle replaces it.
    fn compact(&self, bytes: &[u8], index: &HashMap<Vec<u8>, Slot>) -> CacheResult<Handle> {
        let mut keys: Vec<&Vec<u8>> = index.keys().collect();
        keys.sort();

        let mut out = header().to_vec();
        for key in keys {
            let slot = index[key];
            let start = slot.offset as usize;
            let value = &bytes[start..start + slot.len as usize];
            out.extend(encode(OP_PUT, key, value).map_err(|e| self.io_error("compacting", e))?);
        }

        let tmp = compaction_path(&self.path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)
            .map_err(|e| self.io_error("creating compacted copy of", e))?;
        let lock_file = file.try_clone().map_err(|e| self.io_error("locking", e))?;
        let lock = StoreLock::acquire(lock_file, &self.path, AccessLevel::ReadWrite)?;

        file.write_all_at(&out, 0)
            .and_then(|_| file.sync_data())
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| self.io_error("compacting", e))?;

        let (index, end) = replay(&out);
        Ok(Handle {
            file: Some(file),
            level: AccessLevel::ReadWrite,
            _lock: Some(lock),
            index,
            end,
        })
    }

    fn handle(&mut self, level: AccessLevel) -> CacheResult<&mut Handle> {
        self.open(level)?;
        let path = self.path.clone();
        self.handle.as_mut().ok_or_else(|| CacheError::StoreOpen {
            backend: Backend::HashLog.name(),
            path,
            reason: "handle not open".to_string(),
        })
    }

    /// Append one record and fsync unless a rebuild defers it
    fn append(&mut self, op: u8, key: &[u8], value: &[u8]) -> CacheResult<u64> {
        let record = encode(op, key, value).map_err(|e| self.io_error("encoding for", e))?;
        let durable = !self.in_rebuild;
        let path = self.path.clone();

        let handle = self.handle(AccessLevel::ReadWrite)?;
        let file = handle.file.as_ref().ok_or_else(|| CacheError::StoreOpen {
            backend: Backend::HashLog.name(),
            path: path.clone(),
            reason: "store file missing".to_string(),
        })?;

        let at = handle.end;
        file.write_all_at(&record, at)
            .and_then(|_| if durable { file.sync_data() } else { Ok(()) })
            .map_err(|e| CacheError::io(format!("appending to {}", path.display()), e))?;
        handle.end = at + record.len() as u64;
        Ok(at)
    }

    /// Truncate to the bare header; not reversible
    fn vanish(&mut self) -> CacheResult<()> {
        let path = self.path.clone();
        let handle = self.handle(AccessLevel::ReadWrite)?;
        if let Some(file) = handle.file.as_ref() {
            file.set_len(HEADER_LEN)
                .and_then(|_| file.sync_data())
                .map_err(|e| CacheError::io(format!("clearing {}", path.display()), e))?;
        }
        handle.index.clear();
        handle.end = HEADER_LEN;
        Ok(())
    }
}

impl CacheStore for HashLogStore {
    fn backend(&self) -> Backend {
        Backend::HashLog
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self, level: AccessLevel) -> CacheResult<()> {
        if self.access_level().is_some_and(|held| held >= level) {
            return Ok(());
        }
        self.close();

        let mut loaded = None;
        open_with_self_heal(Backend::HashLog, &self.path, level, || {
            loaded = Some(self.load(level)?);
            Ok(())
        })?;

        if let Some(handle) = loaded {
            debug!(
                "Opened hashlog store {} ({:?}, {} entries)",
                self.path.display(),
                level,
                handle.index.len()
            );
            self.handle = Some(handle);
        }
        Ok(())
    }

    fn access_level(&self) -> Option<AccessLevel> {
        self.handle.as_ref().map(|h| h.level)
    }

    fn read(&mut self, filename: &Path) -> CacheResult<Option<Vec<u8>>> {
        let path = self.path.clone();
        let handle = self.handle(AccessLevel::ReadOnly)?;
        let entry = (handle.index.get(key_bytes(filename)), handle.file.as_ref());
        let (Some(slot), Some(file)) = entry else {
            return Ok(None);
        };

        let mut value = vec![0u8; slot.len as usize];
        file.read_exact_at(&mut value, slot.offset)
            .map_err(|e| CacheError::io(format!("reading {}", path.display()), e))?;
        Ok(Some(value))
    }

    fn write(&mut self, filename: &Path, content: &[u8]) -> CacheResult<()> {
        let key = key_bytes(filename);
        let at = self.append(OP_PUT, key, content)?;
        let handle = self.handle(AccessLevel::ReadWrite)?;
        handle.index.insert(
            key.to_vec(),
            Slot {
                offset: at + (RECORD_PREFIX + key.len()) as u64,
                len: content.len() as u32,
            },
        );
        Ok(())
    }

    fn delete(&mut self, filename: &Path) -> CacheResult<()> {
        let key = key_bytes(filename);
        if !self.handle(AccessLevel::ReadWrite)?.index.contains_key(key) {
            return Ok(());
        }
        self.append(OP_DELETE, key, &[])?;
        self.handle(AccessLevel::ReadWrite)?.index.remove(key);
        Ok(())
    }

    fn len(&mut self) -> CacheResult<usize> {
        Ok(self.handle(AccessLevel::ReadOnly)?.index.len())
    }

    fn begin_rebuild(&mut self) -> CacheResult<()> {
        self.vanish()?;
        self.in_rebuild = true;
        Ok(())
    }

    fn commit_rebuild(&mut self) -> CacheResult<()> {
        self.in_rebuild = false;
        let path = self.path.clone();
        let handle = self.handle(AccessLevel::ReadWrite)?;
        if let Some(file) = handle.file.as_ref() {
            file.sync_data()
                .map_err(|e| CacheError::io(format!("syncing {}", path.display()), e))?;
        }
        Ok(())
    }

    fn abort_rebuild(&mut self) {
        if !self.in_rebuild {
            return;
        }
        self.in_rebuild = false;
        if let Err(e) = self.vanish() {
            warn!("Could not clear {} after aborted rebuild: {}", self.path.display(), e);
        }
    }

    fn close(&mut self) {
        self.abort_rebuild();
        if self.handle.take().is_some() {
            debug!("Closed hashlog store {}", self.path.display());
        }
    }
}

impl Drop for HashLogStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn header() -> [u8; HEADER_LEN as usize] {
    let mut out = [0u8; HEADER_LEN as usize];
    out[..4].copy_from_slice(MAGIC);
    out[4..].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    out
}

fn check_header(bytes: &[u8]) -> Result<(), String> {
    if bytes.len() < HEADER_LEN as usize {
        return Err(format!("truncated header ({} bytes)", bytes.len()));
    }
    let found = &bytes[..HEADER_LEN as usize];
    if &found[..4] != MAGIC {
        return Err(format!("bad magic {}", hex::encode(&found[..4])));
    }
    let version = read_u32(found, 4);
    if version != FORMAT_VERSION {
        return Err(format!("unsupported format version {}", version));
    }
    Ok(())
}

/// Whether `file` is still the file found at `path`
fn still_linked(file: &File, path: &Path) -> bool {
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

fn compaction_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(COMPACT_SUFFIX);
    PathBuf::from(name)
}

fn record_len(key_len: usize, val_len: u32) -> u64 {
    (RECORD_PREFIX + key_len + val_len as usize + CHECK_LEN) as u64
}

/// Bytes taken by the records the index still points at
fn live_bytes(index: &HashMap<Vec<u8>, Slot>) -> u64 {
    index.iter().map(|(key, slot)| record_len(key.len(), slot.len)).sum()
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn checksum(data: &[u8]) -> [u8; CHECK_LEN] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; CHECK_LEN];
    out.copy_from_slice(&digest[..CHECK_LEN]);
    out
}

fn encode(op: u8, key: &[u8], value: &[u8]) -> io::Result<Vec<u8>> {
    let too_large =
        |what: &str| io::Error::new(io::ErrorKind::InvalidInput, format!("{} too large", what));
    let key_len = u32::try_from(key.len()).map_err(|_| too_large("key"))?;
    let val_len = u32::try_from(value.len()).map_err(|_| too_large("value"))?;

    let mut record = Vec::with_capacity(RECORD_PREFIX + key.len() + value.len() + CHECK_LEN);
    record.push(op);
    record.extend_from_slice(&key_len.to_le_bytes());
    record.extend_from_slice(&val_len.to_le_bytes());
    record.extend_from_slice(key);
    record.extend_from_slice(value);
    let check = checksum(&record);
    record.extend_from_slice(&check);
    Ok(record)
}

/// Rebuild the index from a whole log; returns it with the end of the last
/// good record
fn replay(bytes: &[u8]) -> (HashMap<Vec<u8>, Slot>, u64) {
    let mut index = HashMap::new();
    let mut pos = HEADER_LEN as usize;

    while bytes.len() - pos >= RECORD_PREFIX + CHECK_LEN {
        let op = bytes[pos];
        let key_len = read_u32(bytes, pos + 1) as usize;
        let val_len = read_u32(bytes, pos + 5) as usize;

        let body_end = pos + RECORD_PREFIX + key_len + val_len;
        let Some(record_end) = body_end
            .checked_add(CHECK_LEN)
            .filter(|end| *end <= bytes.len())
        else {
            break;
        };
        if checksum(&bytes[pos..body_end]) != bytes[body_end..record_end] {
            debug!(
                "Checksum mismatch at offset {}: {}",
                pos,
                hex::encode(&bytes[body_end..record_end])
            );
            break;
        }

        let key_start = pos + RECORD_PREFIX;
        let key = bytes[key_start..key_start + key_len].to_vec();
        match op {
            OP_PUT => {
                index.insert(
                    key,
                    Slot {
                        offset: (key_start + key_len) as u64,
                        len: val_len as u32,
                    },
                );
            }
            OP_DELETE => {
                index.remove(&key);
            }
            _ => break,
        }
        pos = record_end;
    }

    (index, pos as u64)
}
