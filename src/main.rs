//! listcache - maintain the dpkg file-list cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use listcache::cli::{commands, Cli, Commands};
use listcache::config::ConfigManager;
use listcache::error::CacheResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> CacheResult<ExitCode> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("listcache=warn"),
        1 => EnvFilter::new("listcache=info"),
        _ => EnvFilter::new("listcache=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    debug!("Using config {}", manager.path().display());
    let config = manager.load()?;

    // Dispatch to command
    match cli.command {
        Commands::Check => return commands::check(&config),
        Commands::Exec(args) => return commands::exec(args, &manager),
        Commands::Rebuild(args) => commands::rebuild(args, &config)?,
        Commands::Status(args) => commands::status(args, &config)?,
        Commands::Show(args) => commands::show(args, &config)?,
        Commands::Config(args) => commands::config(args, &config, &manager)?,
    }
    Ok(ExitCode::SUCCESS)
}
