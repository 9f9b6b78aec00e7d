//! Operator configuration: bridge settings plus logging.
//!
//! ```yaml
//! bridge:
//!   request_timeout: 10s
//!   max_queued_outbound_messages: 1024
//!   overflow_policy: drop_oldest
//!   bootstrap_retry_interval: 500ms
//! logging:
//!   level: info
//!   json: false
//!   debug_targets: "queue,router"
//! ```

use std::env;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use webview_bridge::{BridgeConfigFile, BridgeOptions, OverflowPolicy};

pub const CONFIG_FILE_NAME: &str = "webview-bridge.yaml";

pub const ENV_TIMEOUT: &str = "SOUL_BRIDGE_TIMEOUT";
pub const ENV_QUEUE_CAPACITY: &str = "SOUL_BRIDGE_QUEUE_CAPACITY";
pub const ENV_OVERFLOW: &str = "SOUL_BRIDGE_OVERFLOW";
pub const ENV_DEBUG: &str = "SOUL_BRIDGE_DEBUG";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfigFile,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_targets: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            debug_targets: None,
        }
    }
}

impl AppConfig {
    /// Applies `SOUL_BRIDGE_*` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`; blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = get(ENV_TIMEOUT) {
            webview_bridge::config::parse_duration(ENV_TIMEOUT, &raw)?;
            self.bridge.request_timeout = Some(raw.trim().to_string());
        }
        if let Some(raw) = get(ENV_QUEUE_CAPACITY) {
            let capacity = raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("{ENV_QUEUE_CAPACITY} must be a positive integer, got {raw:?}"))?;
            self.bridge.max_queued_outbound_messages = Some(capacity);
        }
        if let Some(raw) = get(ENV_OVERFLOW) {
            let policy = raw.parse::<OverflowPolicy>()?;
            self.bridge.overflow_policy = Some(policy);
        }
        if let Some(raw) = get(ENV_DEBUG) {
            self.logging.debug_targets = Some(raw);
        }
        Ok(())
    }

    pub fn bridge_options(&self) -> Result<BridgeOptions> {
        BridgeOptions::try_from(&self.bridge).context("invalid bridge configuration")
    }
}
