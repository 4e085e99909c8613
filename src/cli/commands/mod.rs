//! CLI command implementations

pub mod check;
pub mod config;
pub mod exec;
pub mod rebuild;
pub mod show;
pub mod status;

pub use check::execute as check;
pub use config::execute as config;
pub use exec::execute as exec;
pub use rebuild::execute as rebuild;
pub use show::execute as show;
pub use status::execute as status;

use crate::config::Config;
use crate::consistency::ConsistencyEngine;
use crate::source::SourceSet;
use crate::store::create_store;

/// Engine over the configured store and source set
pub(crate) fn engine(config: &Config) -> ConsistencyEngine {
    ConsistencyEngine::new(
        create_store(config.store.backend, config.store.path.clone()),
        SourceSet::from_config(&config.source),
    )
}
