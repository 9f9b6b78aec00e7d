//! Outbound queue: buffers envelopes until the content side reports ready.
//!
//! `NotReady -> Flushing -> Ready`, and back to `NotReady` on navigation. While not
//! `Ready` every envelope is appended to a bounded FIFO; entering `Ready` drains it in
//! order. Envelopes queued while a flush is in progress land behind the drained ones.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::diagnostics::BridgeDiagnostics;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics;

/// Behaviour when an envelope arrives and the queue is at capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
    Error,
}

impl OverflowPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            OverflowPolicy::DropOldest => "drop_oldest",
            OverflowPolicy::DropNewest => "drop_newest",
            OverflowPolicy::Error => "error",
        }
    }
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = BridgeError;

    /// Accepts `drop_oldest`, `DROP_OLDEST`, and `drop-oldest` spellings.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            "error" => Ok(OverflowPolicy::Error),
            _ => Err(BridgeError::invalid_argument(format!("unknown overflow policy: {raw}"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueState {
    NotReady,
    Flushing,
    Ready,
}

/// Sink that pushes one serialized envelope into the renderer.
pub type DispatchSink = Arc<dyn Fn(&str) + Send + Sync>;

struct QueueInner {
    state: QueueState,
    messages: VecDeque<String>,
}

pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    sink: DispatchSink,
    capacity: usize,
    policy: OverflowPolicy,
    diagnostics: Arc<dyn BridgeDiagnostics>,
}

impl OutboundQueue {
    pub fn new(
        sink: DispatchSink,
        capacity: usize,
        policy: OverflowPolicy,
        diagnostics: Arc<dyn BridgeDiagnostics>,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                state: QueueState::NotReady,
                messages: VecDeque::new(),
            }),
            sink,
            capacity: capacity.max(1),
            policy,
            diagnostics,
        }
    }

    pub fn state(&self) -> QueueState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == QueueState::Ready
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dispatches immediately when `Ready`, otherwise buffers subject to the overflow policy.
    /// Returns the envelope an overflow discarded, if any.
    pub fn queue_or_dispatch(&self, message: String) -> BridgeResult<Option<String>> {
        let mut inner = self.inner.lock();
        if inner.state == QueueState::Ready {
            drop(inner);
            self.dispatch(&message);
            return Ok(None);
        }

        if inner.messages.len() >= self.capacity {
            let dropped = match self.policy {
                OverflowPolicy::DropOldest => {
                    let evicted = inner.messages.pop_front();
                    inner.messages.push_back(message);
                    drop(inner);
                    metrics::record_queued();
                    evicted
                }
                OverflowPolicy::DropNewest => {
                    drop(inner);
                    Some(message)
                }
                OverflowPolicy::Error => {
                    return Err(BridgeError::QueueFull {
                        capacity: self.capacity,
                    });
                }
            };
            if let Some(dropped) = &dropped {
                self.report_dropped(dropped);
            }
            return Ok(dropped);
        }

        inner.messages.push_back(message);
        trace!(target: "bridge-queue", queued = inner.messages.len(), "outbound message buffered");
        metrics::record_queued();
        Ok(None)
    }

    /// Leaves `Ready`. Buffered envelopes are kept for the next flush.
    pub fn mark_not_ready(&self) {
        let mut inner = self.inner.lock();
        if inner.state != QueueState::NotReady {
            debug!(
                target: "bridge-queue",
                buffered = inner.messages.len(),
                "outbound queue marked not ready"
            );
        }
        inner.state = QueueState::NotReady;
    }

    /// Drains the FIFO into the sink in order, repeating until it stays empty, then enters `Ready`.
    /// If another caller moves the queue back to `NotReady` mid-flush, the undelivered rest of
    /// the batch goes back to the head of the FIFO.
    pub fn mark_ready_and_flush(&self) {
        self.inner.lock().state = QueueState::Flushing;
        let mut flushed = 0usize;

        'flush: loop {
            let mut batch: VecDeque<String> = {
                let mut inner = self.inner.lock();
                if inner.state != QueueState::Flushing {
                    break;
                }
                if inner.messages.is_empty() {
                    inner.state = QueueState::Ready;
                    break;
                }
                inner.messages.drain(..).collect()
            };

            while let Some(message) = batch.pop_front() {
                {
                    let mut inner = self.inner.lock();
                    if inner.state != QueueState::Flushing {
                        batch.push_front(message);
                        let requeued = batch.len();
                        while let Some(rest) = batch.pop_back() {
                            inner.messages.push_front(rest);
                        }
                        debug!(target: "bridge-queue", requeued, "flush interrupted");
                        break 'flush;
                    }
                }
                self.dispatch(&message);
                flushed += 1;
            }
        }

        debug!(target: "bridge-queue", flushed, "outbound queue flushed");
    }

    /// Discards every buffered envelope.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let discarded = inner.messages.len();
        inner.messages.clear();
        if discarded > 0 {
            debug!(target: "bridge-queue", discarded, "outbound queue cleared");
        }
    }

    fn dispatch(&self, message: &str) {
        (self.sink)(message);
        metrics::record_dispatched();
    }

    fn report_dropped(&self, message: &str) {
        metrics::record_dropped();
        self.diagnostics
            .on_outbound_message_dropped(message, self.policy, self.capacity);
    }
}
