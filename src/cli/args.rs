//! CLI argument definitions using clap derive

use crate::store::Backend;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// listcache - persistent cache for dpkg file lists
///
/// Maintains the cache store and runs commands with the cache preloaded.
#[derive(Parser, Debug)]
#[command(name = "listcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LISTCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild the cache store from the list files
    Rebuild(RebuildArgs),

    /// Show store location, size and freshness
    Status(StatusArgs),

    /// Exit non-zero when the store is missing or stale
    Check,

    /// Print the cached content of one file
    Show(ShowArgs),

    /// Run a command with the cache preloaded
    Exec(ExecArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the rebuild command
#[derive(Parser, Debug)]
pub struct RebuildArgs {
    /// Storage engine (overrides the configured one)
    #[arg(short, long)]
    pub backend: Option<Backend>,

    /// Store file (overrides the configured one)
    #[arg(short, long)]
    pub store: Option<PathBuf>,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the show command
#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Absolute path of the list file
    pub file: PathBuf,
}

/// Arguments for the exec command
#[derive(Parser, Debug)]
pub struct ExecArgs {
    /// Preload library (defaults to liblistcache.so next to this binary)
    #[arg(short, long, env = "LISTCACHE_LIBRARY")]
    pub library: Option<PathBuf>,

    /// Command and arguments to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,
}

/// Output format for the status command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple `key=value` lines
    Plain,
}
