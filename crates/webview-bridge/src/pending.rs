//! Pending host-originated requests and their response futures.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::json;
use crate::metrics;

type Completion = oneshot::Sender<BridgeResult<String>>;

struct PendingEntry {
    tx: Completion,
    timer: Option<JoinHandle<()>>,
}

/// Pending map shared between the host context and the renderer callback thread.
///
/// An entry is removed under the lock before its sender fires, so each request
/// resolves at most once no matter which of response, timeout, or invalidation wins.
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequests {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `id` and arms a timer on `runtime` that fails it with a timeout.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
        channel: &str,
        timeout: Duration,
        runtime: &Handle,
    ) -> PendingResponse {
        let (tx, rx) = oneshot::channel();
        self.entries
            .lock()
            .insert(id.to_string(), PendingEntry { tx, timer: None });

        let pending = Arc::downgrade(self);
        let timer_id = id.to_string();
        let timer_channel = channel.to_string();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(pending) = pending.upgrade() else {
                return;
            };
            let error = BridgeError::Timeout {
                id: timer_id.clone(),
                channel: timer_channel.clone(),
                timeout,
            };
            if pending.complete(&timer_id, Err(error)) {
                metrics::record_request_timed_out();
                debug!(
                    target: "bridge-lifecycle",
                    id = %timer_id,
                    channel = %timer_channel,
                    timeout_ms = timeout.as_millis() as u64,
                    "request timed out"
                );
            }
        });

        match self.entries.lock().get_mut(id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }

        PendingResponse {
            id: id.to_string(),
            rx,
        }
    }

    /// Resolves `id` if it is still pending. Returns false when it was already settled.
    pub fn complete(&self, id: &str, result: BridgeResult<String>) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        // The caller may have dropped the future; the request still counts as settled.
        let _ = entry.tx.send(result);
        true
    }

    /// Fails every pending request with `error` and returns how many were failed.
    pub fn fail_all(&self, error: BridgeError) -> usize {
        let drained: Vec<PendingEntry> = self.entries.lock().drain().map(|(_, entry)| entry).collect();
        let failed = drained.len();
        for entry in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            let _ = entry.tx.send(Err(error.clone()));
        }
        failed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves with the response payload JSON, or the reason the request failed.
#[must_use = "the response is only observable by awaiting the future"]
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    rx: oneshot::Receiver<BridgeResult<String>>,
}

impl PendingResponse {
    /// A response that has already failed; used when the request never left the host.
    pub fn failed(id: impl Into<String>, error: BridgeError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self { id: id.into(), rx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingResponse {
    type Output = BridgeResult<String>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without an answer: the owning endpoint went away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A [`PendingResponse`] whose payload is decoded into `R` on arrival.
#[must_use = "the response is only observable by awaiting the future"]
#[derive(Debug)]
pub struct JsonResponse<R> {
    inner: PendingResponse,
    _marker: PhantomData<fn() -> R>,
}

impl<R> JsonResponse<R> {
    pub fn new(inner: PendingResponse) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }
}

impl<R: DeserializeOwned> Future for JsonResponse<R> {
    type Output = BridgeResult<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.inner)
            .poll(cx)
            .map(|result| result.and_then(|text| json::from_json::<R>(&text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn timer_fails_request_and_removes_entry() {
        let pending = PendingRequests::new();
        let response = pending.register("host-1", "slow", Duration::from_millis(50), &Handle::current());
        assert!(pending.contains("host-1"));

        let err = response.await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::Timeout {
                id: "host-1".into(),
                channel: "slow".into(),
                timeout: Duration::from_millis(50),
            }
        );
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completion_is_at_most_once() {
        let pending = PendingRequests::new();
        let response = pending.register("host-1", "c", Duration::from_secs(5), &Handle::current());

        assert!(pending.complete("host-1", Ok("1".into())));
        assert!(!pending.complete("host-1", Ok("2".into())));
        assert_eq!(response.await.unwrap(), "1");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn fail_all_rejects_every_request() {
        let pending = PendingRequests::new();
        let first = pending.register("host-1", "a", Duration::from_secs(5), &Handle::current());
        let second = pending.register("host-2", "b", Duration::from_secs(5), &Handle::current());

        assert_eq!(pending.fail_all(BridgeError::PageChanged), 2);
        assert_eq!(first.await.unwrap_err(), BridgeError::PageChanged);
        assert_eq!(second.await.unwrap_err(), BridgeError::PageChanged);
        assert_eq!(pending.fail_all(BridgeError::Closed), 0);
    }

    #[tokio::test]
    async fn failed_response_resolves_immediately() {
        let response = PendingResponse::failed("host-9", BridgeError::invalid_payload("bad"));
        assert_eq!(response.id(), "host-9");
        assert!(matches!(response.await, Err(BridgeError::InvalidPayload(_))));
    }
}
