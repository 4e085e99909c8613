//! Status command - show store location, size and freshness

use crate::cli::args::{OutputFormat, StatusArgs};
use crate::config::Config;
use crate::consistency::{StaleReason, StoreStatus};
use crate::error::CacheResult;
use crate::ui::{self, UiContext};
use chrono::{DateTime, Local};

/// Execute the status command
pub fn execute(args: StatusArgs, config: &Config) -> CacheResult<()> {
    let mut engine = super::engine(config);
    let status = engine.status()?;
    engine.close();

    match args.format {
        OutputFormat::Table => print_table(&status),
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Plain => print_plain(&status),
    }
    Ok(())
}

fn modified(status: &StoreStatus) -> Option<String> {
    status
        .modified
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
}

fn freshness(status: &StoreStatus) -> String {
    match &status.stale {
        None => "fresh".to_string(),
        Some(StaleReason::Missing) => "missing".to_string(),
        Some(StaleReason::NewerSource(path)) => format!("stale ({} is newer)", path.display()),
    }
}

fn print_table(status: &StoreStatus) {
    let ctx = UiContext::detect();
    ui::intro(&ctx, "List cache");

    ui::key_value(&ctx, "backend", status.backend);
    ui::key_value(&ctx, "store", &status.path.display().to_string());
    ui::key_value(&ctx, "modified", modified(status).as_deref().unwrap_or("-"));
    ui::key_value(
        &ctx,
        "entries",
        &status.entries.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
    );
    ui::key_value(&ctx, "source files", &status.sources.to_string());
    ui::key_value_status(&ctx, "state", &freshness(status), status.stale.is_none());

    if status.stale.is_some() {
        ui::outro_warn(&ctx, "Run: listcache rebuild");
    }
}

fn print_json(status: &StoreStatus) -> CacheResult<()> {
    let value = serde_json::json!({
        "backend": status.backend,
        "path": status.path,
        "modified": status.modified.map(|t| DateTime::<Local>::from(t).to_rfc3339()),
        "entries": status.entries,
        "sources": status.sources,
        "fresh": status.stale.is_none(),
        "state": freshness(status),
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_plain(status: &StoreStatus) {
    println!("backend={}", status.backend);
    println!("path={}", status.path.display());
    println!("modified={}", modified(status).unwrap_or_default());
    println!(
        "entries={}",
        status.entries.map(|n| n.to_string()).unwrap_or_default()
    );
    println!("sources={}", status.sources);
    println!("fresh={}", status.stale.is_none());
}
