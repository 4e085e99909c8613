//! Exec command - run a command with the cache preloaded

use crate::cli::args::ExecArgs;
use crate::config::{ConfigManager, CONFIG_ENV};
use crate::error::{CacheError, CacheResult};
use std::ffi::{OsStr, OsString};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, ExitStatus};
use tracing::debug;

/// File name of the preload library
pub const LIBRARY_NAME: &str = "liblistcache.so";

/// Where packaged installs put the library
const SYSTEM_LIBRARY_DIR: &str = "/usr/lib/listcache";

/// Execute the exec command
pub fn execute(args: ExecArgs, manager: &ConfigManager) -> CacheResult<ExitCode> {
    let library = resolve_library(args.library)?;
    let preload = preload_value(&library, std::env::var_os("LD_PRELOAD").as_deref());

    let (program, rest) = match args.command.split_first() {
        Some(split) => split,
        None => return Ok(ExitCode::SUCCESS),
    };
    debug!("Running {} with LD_PRELOAD={}", program, preload.to_string_lossy());

    let status = Command::new(program)
        .args(rest)
        .env("LD_PRELOAD", &preload)
        .env(CONFIG_ENV, manager.path())
        .status()
        .map_err(|e| CacheError::command_failed(program.clone(), e))?;

    Ok(ExitCode::from(exit_code(status)))
}

/// Explicit library, else next to this binary, else the system location
fn resolve_library(explicit: Option<PathBuf>) -> CacheResult<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path)
        } else {
            Err(CacheError::LibraryNotFound(path))
        };
    }

    let beside_exe = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(LIBRARY_NAME)));
    let system = Path::new(SYSTEM_LIBRARY_DIR).join(LIBRARY_NAME);

    beside_exe
        .into_iter()
        .chain(std::iter::once(system.clone()))
        .find(|candidate| candidate.is_file())
        .ok_or(CacheError::LibraryNotFound(system))
}

/// Our library first, keeping whatever was already preloaded
fn preload_value(library: &Path, existing: Option<&OsStr>) -> OsString {
    let mut value = library.as_os_str().to_owned();
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

/// Shell convention: the child's code, or 128 + signal
fn exit_code(status: ExitStatus) -> u8 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code as u8,
        (None, Some(signal)) => 128u8.wrapping_add(signal as u8),
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_library_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join(LIBRARY_NAME);
        let err = resolve_library(Some(missing.clone())).unwrap_err();
        assert!(matches!(err, CacheError::LibraryNotFound(p) if p == missing));

        std::fs::write(&missing, b"\x7fELF").unwrap();
        assert_eq!(resolve_library(Some(missing.clone())).unwrap(), missing);
    }

    #[test]
    fn preload_prepends_to_existing() {
        let lib = Path::new("/usr/lib/listcache/liblistcache.so");
        assert_eq!(preload_value(lib, None), OsString::from(lib));
        assert_eq!(preload_value(lib, Some(OsStr::new(""))), OsString::from(lib));
        assert_eq!(
            preload_value(lib, Some(OsStr::new("/lib/libfoo.so"))),
            OsString::from("/usr/lib/listcache/liblistcache.so:/lib/libfoo.so")
        );
    }

    #[test]
    fn exit_codes_follow_shell_convention() {
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code(ExitStatus::from_raw(libc::SIGKILL)), 137);
    }
}
