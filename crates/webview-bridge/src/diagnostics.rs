//! Diagnostics hooks for conditions that are handled locally but worth surfacing.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::queue::OverflowPolicy;

pub trait BridgeDiagnostics: Send + Sync {
    /// An outbound envelope was discarded because the queue was at capacity.
    fn on_outbound_message_dropped(&self, message: &str, policy: OverflowPolicy, capacity: usize);

    /// A request handler registration replaced an existing one.
    fn on_request_handler_replaced(&self, _channel: &str) {}

    /// A ready or event listener failed; `channel` is `None` for ready listeners.
    fn on_listener_failed(&self, _channel: Option<&str>, _error: &str) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDiagnostics;

impl BridgeDiagnostics for NoopDiagnostics {
    fn on_outbound_message_dropped(&self, _message: &str, _policy: OverflowPolicy, _capacity: usize) {}
}

/// Logs every diagnostic at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl BridgeDiagnostics for TracingDiagnostics {
    fn on_outbound_message_dropped(&self, message: &str, policy: OverflowPolicy, capacity: usize) {
        warn!(
            target: "bridge-queue",
            ?policy,
            capacity,
            size = message.len(),
            "outbound bridge message dropped"
        );
    }

    fn on_request_handler_replaced(&self, channel: &str) {
        warn!(target: "bridge-registry", channel, "request handler replaced");
    }

    fn on_listener_failed(&self, channel: Option<&str>, error: &str) {
        warn!(target: "bridge-registry", ?channel, error, "bridge listener failed");
    }
}

/// Diagnostic notifications published to observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiagnosticEvent {
    OutboundDropped {
        message: String,
        policy: OverflowPolicy,
        capacity: usize,
    },
    HandlerReplaced {
        channel: String,
    },
    ListenerFailed {
        channel: Option<String>,
        error: String,
    },
}

pub type DiagnosticBus = broadcast::Sender<DiagnosticEvent>;

/// Publishes diagnostics on a broadcast bus. Sends with no subscribers are ignored.
#[derive(Clone, Debug)]
pub struct BroadcastDiagnostics {
    events: DiagnosticBus,
}

impl BroadcastDiagnostics {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<DiagnosticEvent>) {
        let (events, rx) = broadcast::channel(capacity.max(1));
        (Self { events }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.events.subscribe()
    }
}

impl BridgeDiagnostics for BroadcastDiagnostics {
    fn on_outbound_message_dropped(&self, message: &str, policy: OverflowPolicy, capacity: usize) {
        let _ = self.events.send(DiagnosticEvent::OutboundDropped {
            message: message.to_string(),
            policy,
            capacity,
        });
    }

    fn on_request_handler_replaced(&self, channel: &str) {
        let _ = self.events.send(DiagnosticEvent::HandlerReplaced {
            channel: channel.to_string(),
        });
    }

    fn on_listener_failed(&self, channel: Option<&str>, error: &str) {
        let _ = self.events.send(DiagnosticEvent::ListenerFailed {
            channel: channel.map(str::to_string),
            error: error.to_string(),
        });
    }
}
