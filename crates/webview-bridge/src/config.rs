//! File-backed bridge settings.
//!
//! Durations are human readable (`"10s"`, `"500ms"`) and parsed with `humantime`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::options::{BridgeOptions, BridgeOptionsBuilder};
use crate::queue::OverflowPolicy;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_queued_outbound_messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overflow_policy: Option<OverflowPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_retry_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bootstrap_script_path: Option<String>,
}

impl BridgeConfigFile {
    /// Layers the file's values over `builder`. Missing fields keep the builder's values.
    pub fn apply(&self, mut builder: BridgeOptionsBuilder) -> BridgeResult<BridgeOptionsBuilder> {
        if let Some(raw) = self.request_timeout.as_deref() {
            builder = builder.default_request_timeout(parse_duration("request_timeout", raw)?);
        }
        if let Some(capacity) = self.max_queued_outbound_messages {
            builder = builder.max_queued_outbound_messages(capacity);
        }
        if let Some(policy) = self.overflow_policy {
            builder = builder.queue_overflow_policy(policy);
        }
        if let Some(raw) = self.bootstrap_retry_interval.as_deref() {
            builder = builder.bootstrap_retry_interval(parse_duration("bootstrap_retry_interval", raw)?);
        }
        if let Some(path) = self.bootstrap_script_path.as_deref() {
            let script = std::fs::read_to_string(path).map_err(|err| {
                BridgeError::invalid_argument(format!("failed to read bootstrap script {path}: {err}"))
            })?;
            builder = builder.bootstrap_script(script);
        }
        Ok(builder)
    }
}

impl TryFrom<&BridgeConfigFile> for BridgeOptions {
    type Error = BridgeError;

    fn try_from(file: &BridgeConfigFile) -> Result<Self, Self::Error> {
        file.apply(BridgeOptions::builder())?.build()
    }
}

impl TryFrom<BridgeConfigFile> for BridgeOptions {
    type Error = BridgeError;

    fn try_from(file: BridgeConfigFile) -> Result<Self, Self::Error> {
        BridgeOptions::try_from(&file)
    }
}

pub fn parse_duration(field: &str, raw: &str) -> BridgeResult<Duration> {
    humantime::parse_duration(raw.trim())
        .map_err(|_| BridgeError::invalid_argument(format!("invalid duration for {field}: {raw}")))
}
