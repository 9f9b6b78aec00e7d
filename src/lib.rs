//! Operator tooling for the SoulBrowser webview bridge
//!
//! Exposes modules for integration testing

pub mod cli;
pub mod config;
pub mod simulator;

pub use config::AppConfig;
pub use simulator::{ContentSide, SimulatedRenderer};
