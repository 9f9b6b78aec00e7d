use anyhow::Result;
use clap::Args;
use webview_bridge::bootstrap;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct BootstrapArgs {
    /// Emit the script as one quoted indirect-eval expression
    #[arg(long)]
    pub wrap: bool,
}

pub fn cmd_bootstrap(args: BootstrapArgs, ctx: &CliContext) -> Result<()> {
    let options = ctx.bridge_options()?;
    let script = options.bootstrap_script();
    if args.wrap {
        println!("{}", bootstrap::wrapped_script(script));
    } else {
        println!("{script}");
    }
    Ok(())
}
