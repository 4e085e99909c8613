//! Decision layer behind the preloaded file-access overrides
//!
//! Every override asks the [`Interceptor`] first. It either serves the call
//! from the cache or answers [`Outcome::Passthrough`], in which case the
//! override performs the real call unchanged. Guards are checked in order:
//!
//! 1. cache disabled
//! 2. path outside the source set
//! 3. write access requested
//! 4. another virtual file already open
//!
//! Descriptor and stream calls are matched against the live session only,
//! so a session opened before the cache got disabled still reads to the end.

pub mod session;

#[cfg(all(feature = "preload", target_os = "linux"))]
mod preload;
#[cfg(all(feature = "preload", target_os = "linux"))]
pub mod real;

pub use session::{SessionHandle, VirtualFile};

use crate::config::Config;
use crate::consistency::ConsistencyEngine;
use crate::error::CacheError;
use crate::source::SourceSet;
use crate::store::create_store;
use std::os::raw::c_int;
use std::path::Path;
use tracing::{debug, trace, warn};

/// Descriptor handed out for a virtual file opened with `open`
pub const SYNTHETIC_FD: c_int = 4321;

/// Answer to an intercepted call
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// Handled from the cache; the real call must not happen
    Served(T),
    /// Perform the real call
    Passthrough,
}

/// Guard that turned an open away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Disabled,
    Unwatched,
    WriteAccess,
    Nested,
}

/// Flags that make an `open` anything but a plain read
const NON_READ_FLAGS: c_int = libc::O_CREAT
    | libc::O_TRUNC
    | libc::O_APPEND
    | libc::O_DIRECTORY
    | libc::O_PATH
    | libc::O_TMPFILE;

fn read_only_flags(flags: c_int) -> bool {
    flags & libc::O_ACCMODE == libc::O_RDONLY && flags & NON_READ_FLAGS == 0
}

fn read_only_mode(mode: &str) -> bool {
    mode.starts_with('r') && !mode.contains('+')
}

/// Per-process interception state
pub struct Interceptor {
    // None once the cache is disabled
    engine: Option<ConsistencyEngine>,
    session: Option<VirtualFile>,
}

impl Interceptor {
    pub fn new(engine: ConsistencyEngine) -> Self {
        Self {
            engine: Some(engine),
            session: None,
        }
    }

    /// Build an enabled interceptor; the store is opened on first use
    pub fn from_config(config: &Config) -> Self {
        let sources = SourceSet::from_config(&config.source);
        let store = create_store(config.store.backend, config.store.path.clone());
        Self::new(ConsistencyEngine::new(store, sources))
    }

    /// An interceptor that passes everything through
    pub fn disabled() -> Self {
        Self {
            engine: None,
            session: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.engine.is_some()
    }

    pub fn engine(&self) -> Option<&ConsistencyEngine> {
        self.engine.as_ref()
    }

    pub fn session(&self) -> Option<&VirtualFile> {
        self.session.as_ref()
    }

    /// First guard refusing an open; `read_only` is the entry point's access check
    fn refusal(&self, path: &Path, read_only: bool) -> Option<Refusal> {
        let Some(engine) = self.engine.as_ref() else {
            return Some(Refusal::Disabled);
        };
        if !engine.sources().contains(path) {
            return Some(Refusal::Unwatched);
        }
        if !read_only {
            return Some(Refusal::WriteAccess);
        }
        if self.session.is_some() {
            return Some(Refusal::Nested);
        }
        None
    }

    fn admits(&self, path: &Path, read_only: bool) -> bool {
        match (self.refusal(path, read_only), self.session.as_ref()) {
            (None, _) => true,
            (Some(Refusal::Nested), Some(open)) => {
                warn!(
                    "{} opened while {} is still open, not caching",
                    path.display(),
                    open.path().display()
                );
                false
            }
            (Some(_), _) => false,
        }
    }

    /// Cached content, disabling the cache on fatal errors
    fn lookup(&mut self, path: &Path) -> Option<Vec<u8>> {
        let engine = self.engine.as_mut()?;
        match engine.lookup(path) {
            Ok(content) => content,
            Err(e) if !e.is_fatal() => {
                debug!("Lookup of {} failed: {}", path.display(), e);
                None
            }
            Err(e) => {
                self.disable(&e);
                None
            }
        }
    }

    pub fn open(&mut self, path: &Path, flags: c_int) -> Outcome<c_int> {
        if !self.admits(path, read_only_flags(flags)) {
            return Outcome::Passthrough;
        }
        let Some(content) = self.lookup(path) else {
            return Outcome::Passthrough;
        };

        trace!("Serving {} from cache ({} bytes)", path.display(), content.len());
        self.session = Some(VirtualFile::new(
            SessionHandle::Descriptor(SYNTHETIC_FD),
            path.to_path_buf(),
            content,
        ));
        Outcome::Served(SYNTHETIC_FD)
    }

    /// Size to report for the virtual file behind `fd`
    pub fn fstat(&self, fd: c_int) -> Outcome<u64> {
        match self.session.as_ref() {
            Some(vf) if vf.is_descriptor(fd) => Outcome::Served(vf.len() as u64),
            _ => Outcome::Passthrough,
        }
    }

    pub fn read(&mut self, fd: c_int, buf: &mut [u8]) -> Outcome<usize> {
        match self.session.as_mut() {
            Some(vf) if vf.is_descriptor(fd) => Outcome::Served(vf.read(buf)),
            _ => Outcome::Passthrough,
        }
    }

    pub fn close(&mut self, fd: c_int) -> Outcome<()> {
        match self.session.take() {
            Some(vf) if vf.is_descriptor(fd) => {
                trace!("Closed virtual {}", vf.path().display());
                Outcome::Served(())
            }
            other => {
                self.session = other;
                Outcome::Passthrough
            }
        }
    }

    /// Serve a stream open; `attach` turns the content into a stream id
    ///
    /// The content buffer handed to `attach` stays at the same address
    /// until the session ends in [`Interceptor::fclose`].
    pub fn fopen<F>(&mut self, path: &Path, mode: &str, attach: F) -> Outcome<usize>
    where
        F: FnOnce(&[u8]) -> Option<usize>,
    {
        if !self.admits(path, read_only_mode(mode)) {
            return Outcome::Passthrough;
        }
        let Some(content) = self.lookup(path) else {
            return Outcome::Passthrough;
        };
        let Some(stream) = attach(&content) else {
            debug!("Could not create a memory stream for {}", path.display());
            return Outcome::Passthrough;
        };

        trace!("Serving stream {} from cache ({} bytes)", path.display(), content.len());
        self.session = Some(VirtualFile::new(
            SessionHandle::Stream(stream),
            path.to_path_buf(),
            content,
        ));
        Outcome::Served(stream)
    }

    /// End a stream session
    ///
    /// The returned file owns the buffer the stream reads from; drop it only
    /// after the stream itself is closed.
    pub fn fclose(&mut self, stream: usize) -> Outcome<VirtualFile> {
        match self.session.take() {
            Some(vf) if vf.is_stream(stream) => Outcome::Served(vf),
            other => {
                self.session = other;
                Outcome::Passthrough
            }
        }
    }

    /// Mirror a successful real rename into the store
    pub fn renamed(&mut self, from: &Path, to: &Path) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let drop_old = engine.sources().contains(from);
        let add_new = engine.sources().contains(to);

        let mut result = Ok(());
        if drop_old {
            result = engine.remove(from);
        }
        if add_new && result.is_ok() {
            result = engine.publish(to);
        }
        if let Err(e) = result {
            self.disable(&e);
        }
    }

    /// Mirror a successful real unlink into the store
    pub fn unlinked(&mut self, path: &Path) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if !engine.sources().contains(path) {
            return;
        }
        if let Err(e) = engine.remove(path) {
            self.disable(&e);
        }
    }

    /// Close the store and stop intercepting for the rest of the process
    pub fn disable(&mut self, cause: &CacheError) {
        if let Some(mut engine) = self.engine.take() {
            warn!("List cache disabled, using plain file access: {}", cause);
            engine.close();
        }
    }
}
