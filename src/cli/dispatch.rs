use anyhow::Result;

use super::bootstrap::cmd_bootstrap;
use super::commands::Commands;
use super::config::cmd_config;
use super::context::CliContext;
use super::env::CliArgs;
use super::simulate::cmd_simulate;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Simulate(args) => cmd_simulate(args, ctx, cli.output).await,
        Commands::Bootstrap(args) => cmd_bootstrap(args, ctx),
        Commands::Config(args) => cmd_config(args, ctx, cli.output),
    }
}
