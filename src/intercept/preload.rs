//! Exported overrides installed through `LD_PRELOAD`
//!
//! Each override consults the process-wide [`Interceptor`] and falls back to
//! the next definition of the symbol. The interceptor sits behind a mutex
//! that is only ever `try_lock`ed: when it is busy, either our own store I/O
//! re-entered an override or another thread is in the cache, and both go
//! straight to the real call.

use super::real::{real, unsupported};
use super::{Interceptor, Outcome};
use crate::config::{Config, ConfigManager};
use libc::{c_char, c_int, c_uint, c_void, size_t, ssize_t, FILE};
use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr;
use std::sync::Mutex;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the configured log filter
const LOG_ENV: &str = "LISTCACHE_LOG";

// glibc's stat structure version passed to __fxstat
#[cfg(target_arch = "x86_64")]
const STAT_VER: c_int = 1;
#[cfg(target_arch = "x86")]
const STAT_VER: c_int = 3;
#[cfg(not(any(target_arch = "x86_64", target_arch = "x86")))]
const STAT_VER: c_int = 0;

static INTERCEPTOR: Mutex<Option<Interceptor>> = Mutex::new(None);

fn with_interceptor<T>(f: impl FnOnce(&mut Interceptor) -> Outcome<T>) -> Outcome<T> {
    match INTERCEPTOR.try_lock() {
        Ok(mut slot) => match slot.as_mut() {
            Some(interceptor) => f(interceptor),
            None => Outcome::Passthrough,
        },
        Err(_) => Outcome::Passthrough,
    }
}

/// Borrow a C path as a `Path`; `None` for null pointers
///
/// # Safety
/// `raw` must be null or point to a NUL-terminated string.
unsafe fn c_path<'a>(raw: *const c_char) -> Option<&'a Path> {
    if raw.is_null() {
        return None;
    }
    Some(Path::new(OsStr::from_bytes(CStr::from_ptr(raw).to_bytes())))
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();
    // the host may already have a subscriber, ours is then a no-op
    let _ = if config.log.format == "json" {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[ctor::ctor]
unsafe fn attach() {
    let loaded = ConfigManager::new().load();
    let interceptor = match loaded {
        Ok(config) => {
            init_logging(&config);
            debug!(
                "Caching {} in {} store {}",
                config.source.dir.display(),
                config.store.backend,
                config.store.path.display()
            );
            Interceptor::from_config(&config)
        }
        Err(e) => {
            init_logging(&Config::default());
            warn!("List cache disabled: {}", e);
            Interceptor::disabled()
        }
    };

    match INTERCEPTOR.lock() {
        Ok(mut slot) => *slot = Some(interceptor),
        Err(poisoned) => *poisoned.into_inner() = Some(interceptor),
    }
}

// Runs after thread-local teardown, where any tracing event aborts the host.
// Nothing here may log, so the interceptor is leaked instead of dropped: the
// store lock goes with the process and committed entries are already durable.
#[ctor::dtor]
unsafe fn detach() {
    if let Ok(mut slot) = INTERCEPTOR.try_lock() {
        if let Some(interceptor) = slot.take() {
            std::mem::forget(interceptor);
        }
    }
}

unsafe fn open_with(
    real_open: Option<super::real::OpenFn>,
    path: *const c_char,
    flags: c_int,
    mode: c_uint,
) -> c_int {
    if let Some(p) = c_path(path) {
        if let Outcome::Served(fd) = with_interceptor(|ic| ic.open(p, flags)) {
            return fd;
        }
    }
    match real_open {
        Some(f) => f(path, flags, mode),
        None => unsupported(-1),
    }
}

// `mode` is only meaningful with O_CREAT or O_TMPFILE; on the supported
// Linux ABIs reading it unconditionally is harmless.
#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: c_uint) -> c_int {
    open_with(real().open, path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: c_uint) -> c_int {
    open_with(real().open64.or(real().open), path, flags, mode)
}

#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: size_t) -> ssize_t {
    if !buf.is_null() && count <= isize::MAX as usize {
        let out = std::slice::from_raw_parts_mut(buf.cast::<u8>(), count);
        if let Outcome::Served(n) = with_interceptor(|ic| ic.read(fd, out)) {
            return n as ssize_t;
        }
    }
    match real().read {
        Some(f) => f(fd, buf, count),
        None => unsupported(-1),
    }
}

#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    if let Outcome::Served(()) = with_interceptor(|ic| ic.close(fd)) {
        return 0;
    }
    match real().close {
        Some(f) => f(fd),
        None => unsupported(-1),
    }
}

/// Fill `buf` with a regular, read-only file of `size` bytes
macro_rules! synthetic_stat {
    ($buf:expr, $size:expr) => {{
        let buf = $buf;
        let size: u64 = $size;
        ptr::write_bytes(buf, 0, 1);
        (*buf).st_mode = libc::S_IFREG | 0o644;
        (*buf).st_nlink = 1;
        (*buf).st_size = size as _;
        (*buf).st_blksize = 4096;
        (*buf).st_blocks = size.div_ceil(512) as _;
    }};
}

fn virtual_size(fd: c_int) -> Option<u64> {
    match with_interceptor(|ic| ic.fstat(fd)) {
        Outcome::Served(size) => Some(size),
        Outcome::Passthrough => None,
    }
}

#[no_mangle]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    if !buf.is_null() {
        if let Some(size) = virtual_size(fd) {
            synthetic_stat!(buf, size);
            return 0;
        }
    }
    let io = real();
    match (io.fstat, io.fxstat) {
        (Some(f), _) => f(fd, buf),
        (None, Some(f)) => f(STAT_VER, fd, buf),
        (None, None) => unsupported(-1),
    }
}

#[no_mangle]
pub unsafe extern "C" fn fstat64(fd: c_int, buf: *mut libc::stat64) -> c_int {
    if !buf.is_null() {
        if let Some(size) = virtual_size(fd) {
            synthetic_stat!(buf, size);
            return 0;
        }
    }
    let io = real();
    match (io.fstat64, io.fxstat64) {
        (Some(f), _) => f(fd, buf),
        (None, Some(f)) => f(STAT_VER, fd, buf),
        (None, None) => unsupported(-1),
    }
}

#[no_mangle]
pub unsafe extern "C" fn __fxstat(ver: c_int, fd: c_int, buf: *mut libc::stat) -> c_int {
    if !buf.is_null() {
        if let Some(size) = virtual_size(fd) {
            synthetic_stat!(buf, size);
            return 0;
        }
    }
    match real().fxstat {
        Some(f) => f(ver, fd, buf),
        None => unsupported(-1),
    }
}

#[no_mangle]
pub unsafe extern "C" fn __fxstat64(ver: c_int, fd: c_int, buf: *mut libc::stat64) -> c_int {
    if !buf.is_null() {
        if let Some(size) = virtual_size(fd) {
            synthetic_stat!(buf, size);
            return 0;
        }
    }
    match real().fxstat64 {
        Some(f) => f(ver, fd, buf),
        None => unsupported(-1),
    }
}

unsafe fn fopen_with(
    real_fopen: Option<super::real::FopenFn>,
    path: *const c_char,
    mode: *const c_char,
) -> *mut FILE {
    if let (Some(p), false) = (c_path(path), mode.is_null()) {
        let mode_str = CStr::from_ptr(mode).to_str().unwrap_or("");
        let outcome = with_interceptor(|ic| {
            ic.fopen(p, mode_str, |content| {
                let fmemopen = real().fmemopen?;
                // the buffer is never written through a read-only stream
                let stream = fmemopen(
                    content.as_ptr().cast_mut().cast::<c_void>(),
                    content.len(),
                    c"r".as_ptr(),
                );
                (!stream.is_null()).then_some(stream as usize)
            })
        });
        if let Outcome::Served(stream) = outcome {
            return stream as *mut FILE;
        }
    }
    match real_fopen {
        Some(f) => f(path, mode),
        None => unsupported(ptr::null_mut()),
    }
}

#[no_mangle]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    fopen_with(real().fopen, path, mode)
}

#[no_mangle]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    fopen_with(real().fopen64.or(real().fopen), path, mode)
}

#[no_mangle]
pub unsafe extern "C" fn fclose(stream: *mut FILE) -> c_int {
    let session = match with_interceptor(|ic| ic.fclose(stream as usize)) {
        Outcome::Served(session) => Some(session),
        Outcome::Passthrough => None,
    };
    let rc = match real().fclose {
        Some(f) => f(stream),
        None => unsupported(libc::EOF),
    };
    // the memory stream read from this buffer until the line above
    drop(session);
    rc
}

#[no_mangle]
pub unsafe extern "C" fn rename(from: *const c_char, to: *const c_char) -> c_int {
    let rc = match real().rename {
        Some(f) => f(from, to),
        None => return unsupported(-1),
    };
    if rc == 0 {
        if let (Some(from), Some(to)) = (c_path(from), c_path(to)) {
            let outcome = with_interceptor(|ic| {
                ic.renamed(from, to);
                Outcome::Served(())
            });
            if outcome == Outcome::Passthrough {
                debug!("Cache busy, rename of {} not mirrored", to.display());
            }
        }
    }
    rc
}

#[no_mangle]
pub unsafe extern "C" fn unlink(path: *const c_char) -> c_int {
    let rc = match real().unlink {
        Some(f) => f(path),
        None => return unsupported(-1),
    };
    if rc == 0 {
        if let Some(p) = c_path(path) {
            let outcome = with_interceptor(|ic| {
                ic.unlinked(p);
                Outcome::Served(())
            });
            if outcome == Outcome::Passthrough {
                debug!("Cache busy, unlink of {} not mirrored", p.display());
            }
        }
    }
    rc
}
