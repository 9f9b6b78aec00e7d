//! Host-originated requests: id allocation, envelope construction, and resolution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use crate::codec;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics;
use crate::pending::{PendingRequests, PendingResponse};
use crate::protocol::{self, Kind, WireError};
use crate::queue::OutboundQueue;

pub struct RequestLifecycle {
    sequence: AtomicU64,
    pending: Arc<PendingRequests>,
    queue: Arc<OutboundQueue>,
    runtime: Handle,
}

impl RequestLifecycle {
    pub fn new(queue: Arc<OutboundQueue>, runtime: Handle) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            pending: PendingRequests::new(),
            queue,
            runtime,
        }
    }

    fn next_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{seq}", protocol::REQUEST_ID_PREFIX)
    }

    /// Registers a pending entry, queues the request envelope, and returns without waiting.
    ///
    /// A malformed payload or a refused enqueue fails the returned future right away and
    /// leaves nothing pending.
    pub fn request(&self, channel: &str, payload_json: &str, timeout: Duration) -> PendingResponse {
        let id = self.next_id();
        metrics::record_request_started();
        let response = self.pending.register(&id, channel, timeout, &self.runtime);

        let sent = codec::parse_payload(payload_json)
            .and_then(|payload| codec::build_envelope(Kind::Request, Some(&id), channel, &payload))
            .and_then(|envelope| self.enqueue(envelope));
        if let Err(err) = sent {
            debug!(target: "bridge-lifecycle", %id, channel, error = %err, "request failed before dispatch");
            metrics::record_request_failed();
            self.pending.complete(&id, Err(err));
        } else {
            debug!(
                target: "bridge-lifecycle",
                %id,
                channel,
                timeout_ms = timeout.as_millis() as u64,
                "request queued"
            );
        }

        response
    }

    /// Queues or dispatches an outbound envelope. A request envelope the queue discards on
    /// overflow fails its pending entry right away.
    pub fn enqueue(&self, envelope: String) -> BridgeResult<()> {
        let Some(dropped) = self.queue.queue_or_dispatch(envelope)? else {
            return Ok(());
        };
        let Some(packet) = codec::parse(&dropped) else {
            return Ok(());
        };
        if packet.kind.as_deref() != Some(Kind::Request.as_str()) {
            return Ok(());
        }
        if let Some(id) = packet.id {
            let error = BridgeError::Dropped {
                id: id.clone(),
                capacity: self.queue.capacity(),
            };
            if self.pending.complete(&id, Err(error)) {
                debug!(target: "bridge-lifecycle", %id, "queued request discarded on overflow");
                metrics::record_request_failed();
            }
        }
        Ok(())
    }

    /// Settles the pending request named by a response envelope. Unknown ids are ignored.
    pub fn handle_response(
        &self,
        id: Option<&str>,
        channel: Option<&str>,
        ok: Option<bool>,
        payload: &Value,
        error: Option<&WireError>,
    ) -> bool {
        let Some(id) = id else {
            return false;
        };

        let result = if ok == Some(false) {
            let error = error.cloned().unwrap_or_else(|| WireError::new(None, None));
            Err(BridgeError::Remote {
                code: error.code,
                message: error.message,
                id: id.to_string(),
                channel: channel.map(str::to_string),
            })
        } else {
            Ok(codec::payload_to_json(payload))
        };
        let succeeded = result.is_ok();

        let settled = self.pending.complete(id, result);
        if settled {
            if succeeded {
                metrics::record_request_succeeded();
            } else {
                metrics::record_request_failed();
            }
        } else {
            debug!(target: "bridge-lifecycle", id, "response for unknown or settled request ignored");
        }
        settled
    }

    pub fn fail_all_for_page_change(&self) -> usize {
        self.fail_all(BridgeError::PageChanged)
    }

    pub fn fail_all_for_close(&self) -> usize {
        self.fail_all(BridgeError::Closed)
    }

    fn fail_all(&self, error: BridgeError) -> usize {
        let failed = self.pending.fail_all(error.clone());
        if failed > 0 {
            debug!(target: "bridge-lifecycle", failed, cause = error.code(), "pending requests invalidated");
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }
}
