//! Check command - exit status reflects store freshness

use crate::config::Config;
use crate::consistency::StaleReason;
use crate::error::CacheResult;
use crate::ui::{self, UiContext};
use std::process::ExitCode;

/// Execute the check command
pub fn execute(config: &Config) -> CacheResult<ExitCode> {
    let ctx = UiContext::detect();
    let engine = super::engine(config);

    match engine.staleness()? {
        None => {
            ui::step_ok(&ctx, &format!("{} is up to date", config.store.path.display()), None);
            Ok(ExitCode::SUCCESS)
        }
        Some(StaleReason::Missing) => {
            ui::step_warn_hint(
                &ctx,
                &format!("{} does not exist", config.store.path.display()),
                "Run: listcache rebuild",
            );
            Ok(ExitCode::FAILURE)
        }
        Some(StaleReason::NewerSource(path)) => {
            ui::step_warn_hint(
                &ctx,
                &format!("{} changed after the last rebuild", path.display()),
                "Run: listcache rebuild",
            );
            Ok(ExitCode::FAILURE)
        }
    }
}
