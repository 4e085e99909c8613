//! Rebuild command - repopulate the store from the list files

use crate::cli::args::RebuildArgs;
use crate::config::Config;
use crate::consistency::ConsistencyEngine;
use crate::error::CacheResult;
use crate::source::SourceSet;
use crate::store::{create_store, RebuildStep};
use crate::ui::{self, RebuildProgress, UiContext};

/// Execute the rebuild command
pub fn execute(args: RebuildArgs, config: &Config) -> CacheResult<()> {
    let ctx = UiContext::detect();
    let backend = args.backend.unwrap_or(config.store.backend);
    let path = args.store.unwrap_or_else(|| config.store.path.clone());

    let mut engine = ConsistencyEngine::new(
        create_store(backend, path.clone()),
        SourceSet::from_config(&config.source),
    );

    let progress = RebuildProgress::new(&ctx, &engine.sources().dir().display().to_string());
    let mut observe = |step: RebuildStep<'_>| progress.on_step(step);
    let result = engine.rebuild(Some(&mut observe));
    progress.finish();
    let files = result?;
    engine.close();

    ui::step_ok(
        &ctx,
        &format!("{} list files cached", files),
        Some(&format!("{} store {}", backend, path.display())),
    );
    Ok(())
}
