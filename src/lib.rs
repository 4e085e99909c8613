//! listcache - transparent persistent cache for dpkg file lists
//!
//! Loaded with `LD_PRELOAD`, the library serves read-only opens of
//! `/var/lib/dpkg/info/*.list` from a single store file instead of
//! thousands of small files. Built with the `preload` feature, the cdylib
//! exports the libc overrides; the rlib and the `listcache` binary never
//! interpose on themselves.

pub mod cli;
pub mod config;
pub mod consistency;
pub mod error;
pub mod intercept;
pub mod source;
pub mod store;
pub mod ui;

pub use error::{CacheError, CacheResult};
