pub mod cli;
pub mod core;
pub mod providers;

use crate::cli::analyze::AnalyzeOptions;
use crate::core::config::AppConfig;
use anyhow::Result;
use tracing::{debug, info};

pub enum AppCommand {
    Analyze(AnalyzeOptions),
    Currencies { offline: bool },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("xrank starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!(
        from = %config.from,
        to = %config.to,
        providers = config.providers.len(),
        has_api_key = config.api_key.is_some(),
        "Loaded config"
    );

    match command {
        AppCommand::Analyze(options) => cli::analyze::run(&config, options).await,
        AppCommand::Currencies { offline } => cli::currencies::run(&config, offline).await,
    }
}
