use anyhow::Result;
use clap::Parser;
use tracing::{debug, error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let loaded = load_config(cli.config.as_deref()).await?;
    let mut config = loaded.config.clone();
    config.apply_env_overrides()?;
    if let Some(level) = cli.log_level.as_ref() {
        config.logging.level = level.clone();
    }
    if let Some(selector) = cli.debug_targets.as_ref() {
        config.logging.debug_targets = Some(selector.clone());
    }

    init_logging(
        &config.logging.level,
        cli.debug,
        config.logging.json,
        config.logging.debug_targets.as_deref(),
    )?;
    info!("Starting soulbrowser-webview v{}", env!("CARGO_PKG_VERSION"));
    loaded.log_source();
    debug!(overrides_applied = config != loaded.config, "configuration resolved");

    let LoadedConfig { path, from_file, .. } = loaded;
    let cli_context = CliContext::new(config, path, from_file);
    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
