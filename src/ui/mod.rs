//! Terminal output for the `listcache` CLI
//!
//! Interactive terminals get `cliclack` step markers and an `indicatif`
//! progress bar; pipes and CI get plain prefixed lines.

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{intro, key_value, key_value_status, outro_warn, step_ok, step_warn_hint};
pub use progress::RebuildProgress;
