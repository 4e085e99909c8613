//! Show command - dump one cached file

use crate::cli::args::ShowArgs;
use crate::config::Config;
use crate::error::{CacheError, CacheResult};
use std::io::Write;

/// Execute the show command
///
/// Prints the stored bytes exactly; never rebuilds.
pub fn execute(args: ShowArgs, config: &Config) -> CacheResult<()> {
    let mut engine = super::engine(config);
    let content = engine
        .peek(&args.file)?
        .ok_or_else(|| CacheError::EntryNotFound(args.file.clone()))?;
    engine.close();

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&content)
        .and_then(|_| stdout.flush())
        .map_err(|e| CacheError::io("writing to stdout", e))
}
