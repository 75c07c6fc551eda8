//! CLI commands for the options controller.

pub mod run;
pub mod status;

pub use run::{run_controller, RunArgs};
pub use status::{run_status, StatusArgs};

use std::path::PathBuf;

use algo_options_core::{AppConfig, StrategyKind};

/// Where a strategy's state record lives under the data directory.
pub fn state_path(config: &AppConfig, kind: StrategyKind) -> PathBuf {
    PathBuf::from(&config.storage.data_dir).join(format!("{kind}_state.json"))
}

pub fn trade_log_path(config: &AppConfig) -> PathBuf {
    PathBuf::from(&config.storage.data_dir).join(&config.storage.trade_log)
}
