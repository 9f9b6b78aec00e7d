use anyhow::Result;
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::OutputFormat;
use crate::config::AppConfig;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Only check that the configuration is valid
    #[arg(long)]
    pub validate: bool,
}

#[derive(Serialize)]
struct EffectiveOptions {
    request_timeout: String,
    max_queued_outbound_messages: usize,
    overflow_policy: String,
    bootstrap_retry_interval: String,
    bootstrap_script_bytes: usize,
}

#[derive(Serialize)]
struct ConfigView<'a> {
    path: String,
    from_file: bool,
    file: &'a AppConfig,
    effective: EffectiveOptions,
}

pub fn cmd_config(args: ConfigArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let options = ctx.bridge_options()?;
    if args.validate {
        println!("Configuration at {} is valid", ctx.config_path().display());
        return Ok(());
    }

    let view = ConfigView {
        path: ctx.config_path().display().to_string(),
        from_file: ctx.config_from_file(),
        file: ctx.config(),
        effective: EffectiveOptions {
            request_timeout: humantime::format_duration(options.default_request_timeout()).to_string(),
            max_queued_outbound_messages: options.max_queued_outbound_messages(),
            overflow_policy: options.queue_overflow_policy().to_string(),
            bootstrap_retry_interval: humantime::format_duration(options.bootstrap_retry_interval())
                .to_string(),
            bootstrap_script_bytes: options.bootstrap_script().len(),
        },
    };

    if let Some(rendered) = output.render(&view)? {
        println!("{rendered}");
        return Ok(());
    }

    let source = if view.from_file { "loaded" } else { "not found, using defaults" };
    println!("Configuration: {} ({source})", view.path);
    println!("  request timeout:        {}", view.effective.request_timeout);
    println!("  outbound queue:         {} messages", view.effective.max_queued_outbound_messages);
    println!("  overflow policy:        {}", view.effective.overflow_policy);
    println!("  bootstrap retry:        {}", view.effective.bootstrap_retry_interval);
    println!("  bootstrap script:       {} bytes", view.effective.bootstrap_script_bytes);
    println!("  log level:              {}", ctx.config().logging.level);
    if let Some(targets) = ctx.config().logging.debug_targets.as_deref() {
        println!("  debug targets:          {targets}");
    }
    Ok(())
}
