//! The next definitions of the overridden libc functions
//!
//! Resolved once with `dlsym(RTLD_NEXT, ..)`. Entries are optional: older
//! glibc exports `__fxstat` but no `fstat`, newer ones the reverse.

use libc::{c_char, c_int, c_void, size_t, ssize_t, FILE};
use std::ffi::CStr;
use std::sync::OnceLock;

pub type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
pub type ReadFn = unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t;
pub type CloseFn = unsafe extern "C" fn(c_int) -> c_int;
pub type FstatFn = unsafe extern "C" fn(c_int, *mut libc::stat) -> c_int;
pub type Fstat64Fn = unsafe extern "C" fn(c_int, *mut libc::stat64) -> c_int;
pub type FxstatFn = unsafe extern "C" fn(c_int, c_int, *mut libc::stat) -> c_int;
pub type Fxstat64Fn = unsafe extern "C" fn(c_int, c_int, *mut libc::stat64) -> c_int;
pub type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
pub type FcloseFn = unsafe extern "C" fn(*mut FILE) -> c_int;
pub type FmemopenFn = unsafe extern "C" fn(*mut c_void, size_t, *const c_char) -> *mut FILE;
pub type RenameFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
pub type UnlinkFn = unsafe extern "C" fn(*const c_char) -> c_int;

/// Function table of the real implementations
pub struct RealIo {
    pub open: Option<OpenFn>,
    pub open64: Option<OpenFn>,
    pub read: Option<ReadFn>,
    pub close: Option<CloseFn>,
    pub fstat: Option<FstatFn>,
    pub fstat64: Option<Fstat64Fn>,
    pub fxstat: Option<FxstatFn>,
    pub fxstat64: Option<Fxstat64Fn>,
    pub fopen: Option<FopenFn>,
    pub fopen64: Option<FopenFn>,
    pub fclose: Option<FcloseFn>,
    pub fmemopen: Option<FmemopenFn>,
    pub rename: Option<RenameFn>,
    pub unlink: Option<UnlinkFn>,
}

fn next(name: &CStr) -> *mut c_void {
    // SAFETY: `name` is NUL-terminated, RTLD_NEXT is a valid pseudo-handle
    unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) }
}

macro_rules! resolve {
    ($name:expr, $ty:ty) => {{
        let sym = next($name);
        if sym.is_null() {
            None
        } else {
            // SAFETY: the symbol is the libc function with this exact signature
            Some(unsafe { std::mem::transmute::<*mut c_void, $ty>(sym) })
        }
    }};
}

impl RealIo {
    fn resolve() -> Self {
        Self {
            open: resolve!(c"open", OpenFn),
            open64: resolve!(c"open64", OpenFn),
            read: resolve!(c"read", ReadFn),
            close: resolve!(c"close", CloseFn),
            fstat: resolve!(c"fstat", FstatFn),
            fstat64: resolve!(c"fstat64", Fstat64Fn),
            fxstat: resolve!(c"__fxstat", FxstatFn),
            fxstat64: resolve!(c"__fxstat64", Fxstat64Fn),
            fopen: resolve!(c"fopen", FopenFn),
            fopen64: resolve!(c"fopen64", FopenFn),
            fclose: resolve!(c"fclose", FcloseFn),
            fmemopen: resolve!(c"fmemopen", FmemopenFn),
            rename: resolve!(c"rename", RenameFn),
            unlink: resolve!(c"unlink", UnlinkFn),
        }
    }
}

static REAL: OnceLock<RealIo> = OnceLock::new();

/// The real function table, resolved on first use
pub fn real() -> &'static RealIo {
    REAL.get_or_init(RealIo::resolve)
}

/// Fail like libc does for a function that is not there
pub fn unsupported<T>(failure: T) -> T {
    // SAFETY: errno is thread-local and always addressable
    unsafe { *libc::__errno_location() = libc::ENOSYS };
    failure
}
