use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::bootstrap;
use crate::diagnostics::{BridgeDiagnostics, NoopDiagnostics};
use crate::error::{BridgeError, BridgeResult};
use crate::queue::OverflowPolicy;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_QUEUED_OUTBOUND_MESSAGES: usize = 1024;
pub const DEFAULT_BOOTSTRAP_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Per-runtime bridge settings. Every endpoint attached by a runtime shares them.
#[derive(Clone)]
pub struct BridgeOptions {
    default_request_timeout: Duration,
    max_queued_outbound_messages: usize,
    queue_overflow_policy: OverflowPolicy,
    bootstrap_retry_interval: Duration,
    diagnostics: Arc<dyn BridgeDiagnostics>,
    bootstrap_script: Arc<str>,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            default_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_queued_outbound_messages: DEFAULT_MAX_QUEUED_OUTBOUND_MESSAGES,
            queue_overflow_policy: OverflowPolicy::default(),
            bootstrap_retry_interval: DEFAULT_BOOTSTRAP_RETRY_INTERVAL,
            diagnostics: Arc::new(NoopDiagnostics),
            bootstrap_script: Arc::from(bootstrap::script()),
        }
    }
}

impl BridgeOptions {
    pub fn builder() -> BridgeOptionsBuilder {
        BridgeOptionsBuilder {
            options: BridgeOptions::default(),
        }
    }

    pub fn default_request_timeout(&self) -> Duration {
        self.default_request_timeout
    }

    pub fn max_queued_outbound_messages(&self) -> usize {
        self.max_queued_outbound_messages
    }

    pub fn queue_overflow_policy(&self) -> OverflowPolicy {
        self.queue_overflow_policy
    }

    pub fn bootstrap_retry_interval(&self) -> Duration {
        self.bootstrap_retry_interval
    }

    pub fn diagnostics(&self) -> Arc<dyn BridgeDiagnostics> {
        self.diagnostics.clone()
    }

    pub fn bootstrap_script(&self) -> &str {
        &self.bootstrap_script
    }
}

impl fmt::Debug for BridgeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("default_request_timeout", &self.default_request_timeout)
            .field("max_queued_outbound_messages", &self.max_queued_outbound_messages)
            .field("queue_overflow_policy", &self.queue_overflow_policy)
            .field("bootstrap_retry_interval", &self.bootstrap_retry_interval)
            .field("bootstrap_script_len", &self.bootstrap_script.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug)]
pub struct BridgeOptionsBuilder {
    options: BridgeOptions,
}

impl BridgeOptionsBuilder {
    pub fn default_request_timeout(mut self, timeout: Duration) -> Self {
        self.options.default_request_timeout = timeout;
        self
    }

    pub fn max_queued_outbound_messages(mut self, capacity: usize) -> Self {
        self.options.max_queued_outbound_messages = capacity;
        self
    }

    pub fn queue_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.options.queue_overflow_policy = policy;
        self
    }

    pub fn bootstrap_retry_interval(mut self, interval: Duration) -> Self {
        self.options.bootstrap_retry_interval = interval;
        self
    }

    pub fn diagnostics(mut self, diagnostics: Arc<dyn BridgeDiagnostics>) -> Self {
        self.options.diagnostics = diagnostics;
        self
    }

    pub fn bootstrap_script(mut self, script: impl Into<String>) -> Self {
        self.options.bootstrap_script = Arc::from(script.into());
        self
    }

    pub fn build(self) -> BridgeResult<BridgeOptions> {
        let options = self.options;
        if options.default_request_timeout.is_zero() {
            return Err(BridgeError::invalid_argument("default_request_timeout must be > 0"));
        }
        if options.max_queued_outbound_messages == 0 {
            return Err(BridgeError::invalid_argument("max_queued_outbound_messages must be >= 1"));
        }
        if options.bootstrap_retry_interval.is_zero() {
            return Err(BridgeError::invalid_argument("bootstrap_retry_interval must be > 0"));
        }
        if options.bootstrap_script.trim().is_empty() {
            return Err(BridgeError::invalid_argument("bootstrap_script must not be blank"));
        }
        Ok(options)
    }
}
