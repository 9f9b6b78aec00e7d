pub mod app;
pub mod bootstrap;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod runtime;
pub mod simulate;

pub use app::run;
pub use env::CliArgs;
pub use output::OutputFormat;
