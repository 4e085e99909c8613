//! Rebuild progress with CI fallback

use super::context::UiContext;
use crate::store::RebuildStep;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Progress bar for a full store rebuild
///
/// Shows an indicatif bar in interactive mode and a start/end line
/// otherwise; per-file lines would drown a log with thousands of entries.
pub struct RebuildProgress {
    bar: Option<ProgressBar>,
}

impl RebuildProgress {
    pub fn new(ctx: &UiContext, label: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Indexing {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            let bar = ProgressBar::new(0);
            bar.set_style(style);
            bar.set_prefix(label.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Indexing {}...", label);
            None
        };
        Self { bar }
    }

    pub fn on_step(&self, step: RebuildStep<'_>) {
        if let Some(ref bar) = self.bar {
            bar.set_length(step.total as u64);
            bar.set_position(step.index as u64);
            let name = step
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            bar.set_message(name);
        }
    }

    /// Finish and clear the progress bar.
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}
