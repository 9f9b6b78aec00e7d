use clap::Subcommand;

use super::bootstrap::BootstrapArgs;
use super::config::ConfigArgs;
use super::simulate::SimulateArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Drive a bridge endpoint against an in-process simulated renderer
    Simulate(SimulateArgs),

    /// Print the content-side bootstrap script
    Bootstrap(BootstrapArgs),

    /// Show the effective bridge configuration
    Config(ConfigArgs),
}
