pub mod check_config;
pub mod run;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use run::{run_portfolio, RunArgs};

use anyhow::Result;
use portfolio_core::{AppConfig, ConfigLoader};

/// Loads from `path` if given, otherwise from the default location.
pub(crate) fn load_config(path: Option<&str>) -> Result<AppConfig> {
    match path {
        Some(path) => ConfigLoader::load_from(path),
        None => ConfigLoader::load(),
    }
}
