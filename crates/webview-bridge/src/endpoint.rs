//! One bridge endpoint per attached renderer instance.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::bootstrap::BootstrapTracker;
use crate::codec;
use crate::error::{BridgeError, BridgeResult};
use crate::executor::HostExecutor;
use crate::json;
use crate::lifecycle::RequestLifecycle;
use crate::metrics;
use crate::options::BridgeOptions;
use crate::pending::{JsonResponse, PendingResponse};
use crate::protocol::Kind;
use crate::queue::{DispatchSink, OutboundQueue};
use crate::registry::HandlerRegistry;
use crate::renderer::{QueryCallback, RendererHost};
use crate::router::InboundRouter;
use crate::subscription::Subscription;

/// Host-facing handle for one renderer's bridge. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BridgeEndpoint {
    inner: Arc<EndpointInner>,
}

struct EndpointInner {
    renderer: Arc<dyn RendererHost>,
    options: BridgeOptions,
    registry: Arc<HandlerRegistry>,
    queue: Arc<OutboundQueue>,
    lifecycle: Arc<RequestLifecycle>,
    router: InboundRouter,
    bootstrap: BootstrapTracker,
    closed: AtomicBool,
}

impl BridgeEndpoint {
    pub fn new(
        renderer: Arc<dyn RendererHost>,
        options: BridgeOptions,
        executor: Arc<dyn HostExecutor>,
        runtime: Handle,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<EndpointInner>| {
            let diagnostics = options.diagnostics();
            let sink_renderer = renderer.clone();
            let sink: DispatchSink =
                Arc::new(move |envelope: &str| dispatch_to_renderer(sink_renderer.as_ref(), envelope));
            let queue = Arc::new(OutboundQueue::new(
                sink,
                options.max_queued_outbound_messages(),
                options.queue_overflow_policy(),
                diagnostics.clone(),
            ));
            let registry = HandlerRegistry::new(diagnostics);
            let lifecycle = Arc::new(RequestLifecycle::new(queue.clone(), runtime.clone()));

            let ready_target = weak.clone();
            let router = InboundRouter::new(
                registry.clone(),
                lifecycle.clone(),
                executor,
                runtime,
                Arc::new(move || {
                    if let Some(inner) = ready_target.upgrade() {
                        inner.on_bridge_ready();
                    }
                }),
            );

            EndpointInner {
                bootstrap: BootstrapTracker::new(options.bootstrap_retry_interval()),
                renderer,
                options,
                registry,
                queue,
                lifecycle,
                router,
                closed: AtomicBool::new(false),
            }
        });
        Self { inner }
    }

    pub fn renderer_id(&self) -> u64 {
        self.inner.renderer.renderer_id()
    }

    pub fn renderer(&self) -> Arc<dyn RendererHost> {
        self.inner.renderer.clone()
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    pub fn is_ready(&self) -> bool {
        self.inner.queue.is_ready() && !self.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.lifecycle.pending_count()
    }

    pub fn queued_messages(&self) -> usize {
        self.inner.queue.len()
    }

    pub fn ptr_eq(&self, other: &BridgeEndpoint) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Runs `listener` on every transition to ready, and right away if already ready.
    pub fn on_ready<F>(&self, listener: F) -> BridgeResult<Subscription>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_open()?;
        Ok(self.inner.registry.on_ready(Arc::new(listener), self.is_ready()))
    }

    /// `listener` receives `(channel, payload_json)` for every inbound event on `channel`.
    pub fn on_event<F>(&self, channel: &str, listener: F) -> BridgeResult<Subscription>
    where
        F: Fn(&str, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let channel = validate_channel(channel)?;
        self.ensure_open()?;
        Ok(self.inner.registry.on_event(channel, Arc::new(listener)))
    }

    /// Installs the request handler for `channel`; a previous handler is replaced.
    pub fn on_request<F, Fut>(&self, channel: &str, handler: F) -> BridgeResult<Subscription>
    where
        F: Fn(&str, &str) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + Send + 'static,
    {
        let channel = validate_channel(channel)?;
        self.ensure_open()?;
        Ok(self.inner.registry.on_request(
            channel,
            Arc::new(move |channel: &str, payload: &str| handler(channel, payload).boxed()),
        ))
    }

    pub fn on_event_json<T, F>(&self, channel: &str, listener: F) -> BridgeResult<Subscription>
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_event(channel, move |_channel: &str, payload: &str| -> anyhow::Result<()> {
            let value = json::from_json::<T>(payload)?;
            listener(value)
        })
    }

    pub fn on_request_json<T, U, F, Fut>(&self, channel: &str, handler: F) -> BridgeResult<Subscription>
    where
        T: DeserializeOwned + 'static,
        U: Serialize + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<U>> + Send + 'static,
    {
        self.on_request(channel, move |_channel: &str, payload: &str| {
            let call = json::from_json::<T>(payload).map(&handler);
            async move {
                let value = call?.await?;
                Ok::<_, anyhow::Error>(Some(json::to_json(&value)?))
            }
        })
    }

    /// Queues an `event` envelope. Delivered immediately once the content side is ready.
    pub fn emit(&self, channel: &str, payload_json: &str) -> BridgeResult<()> {
        let channel = validate_channel(channel)?;
        let payload = codec::parse_payload(payload_json)?;
        self.ensure_open()?;

        let envelope = codec::build_envelope(Kind::Event, None, channel, &payload)?;
        self.inner.lifecycle.enqueue(envelope)?;
        metrics::record_event_emitted();
        trace!(target: "bridge-endpoint", channel, "event emitted");
        Ok(())
    }

    pub fn emit_json<T: Serialize + ?Sized>(&self, channel: &str, payload: &T) -> BridgeResult<()> {
        let payload_json = json::to_json(payload)?;
        self.emit(channel, &payload_json)
    }

    /// Sends a request with the configured default timeout.
    pub fn request(&self, channel: &str, payload_json: &str) -> BridgeResult<PendingResponse> {
        self.request_with_timeout(channel, payload_json, self.inner.options.default_request_timeout())
    }

    /// Sends a request and returns without waiting. Argument errors are returned here;
    /// everything after that is reported through the returned future.
    pub fn request_with_timeout(
        &self,
        channel: &str,
        payload_json: &str,
        timeout: Duration,
    ) -> BridgeResult<PendingResponse> {
        let channel = validate_channel(channel)?;
        if timeout.is_zero() {
            return Err(BridgeError::invalid_argument("timeout must be > 0"));
        }
        self.ensure_open()?;
        Ok(self.inner.lifecycle.request(channel, payload_json, timeout))
    }

    pub fn request_json<T, R>(&self, channel: &str, payload: &T) -> BridgeResult<JsonResponse<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request_json_with_timeout(channel, payload, self.inner.options.default_request_timeout())
    }

    pub fn request_json_with_timeout<T, R>(
        &self,
        channel: &str,
        payload: &T,
        timeout: Duration,
    ) -> BridgeResult<JsonResponse<R>>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload_json = json::to_json(payload)?;
        let response = self.request_with_timeout(channel, &payload_json, timeout)?;
        Ok(JsonResponse::new(response))
    }

    /// Entry point for the renderer's query transport.
    pub fn handle_query(&self, text: &str, callback: Arc<dyn QueryCallback>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner.router.route(text, callback)
    }

    pub fn on_query_canceled(&self, query_id: i64) {
        // Transport cancellations are not correlated with bridge request ids.
        trace!(target: "bridge-endpoint", query_id, "renderer query canceled");
    }

    /// Host- or content-initiated navigation: leave ready and invalidate pending requests.
    pub fn on_navigation_requested(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.queue.mark_not_ready();
        let failed = self.inner.lifecycle.fail_all_for_page_change();
        self.inner.bootstrap.reset();
        debug!(
            target: "bridge-endpoint",
            renderer = self.renderer_id(),
            failed,
            "navigation started; bridge not ready"
        );
    }

    /// Injects the bootstrap script into the freshly loaded document.
    pub fn on_page_load_end(&self) {
        if self.is_closed() {
            return;
        }
        let url = self.inner.renderer.current_url();
        self.inner.bootstrap.record(&url, Instant::now());
        self.inject_bootstrap(&url);
    }

    /// Re-injects the bootstrap script if the document is loaded but has not reported
    /// ready, subject to the retry interval. Returns true when an injection was attempted.
    pub fn try_bootstrap_fallback(&self) -> bool {
        if self.is_closed() || self.inner.queue.is_ready() || !self.inner.renderer.has_document() {
            return false;
        }
        let url = self.inner.renderer.current_url();
        if !self.inner.bootstrap.try_claim(&url, Instant::now()) {
            return false;
        }
        debug!(target: "bridge-endpoint", %url, "bootstrap fallback injection");
        self.inject_bootstrap(&url);
        true
    }

    /// Idempotent. Drops queued envelopes, fails pending requests, and forgets all listeners.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.inner.queue.mark_not_ready();
        self.inner.queue.clear();
        let failed = self.inner.lifecycle.fail_all_for_close();
        self.inner.registry.clear();
        debug!(target: "bridge-endpoint", renderer = self.renderer_id(), failed, "endpoint closed");
    }

    fn inject_bootstrap(&self, url: &str) {
        if let Err(err) = self
            .inner
            .renderer
            .execute_script(self.inner.options.bootstrap_script(), url)
        {
            // The fallback path retries.
            debug!(target: "bridge-endpoint", %url, error = %err, "bootstrap injection failed");
        }
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if self.is_closed() {
            Err(BridgeError::Closed)
        } else {
            Ok(())
        }
    }
}

impl EndpointInner {
    fn on_bridge_ready(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.queue.mark_ready_and_flush();
        debug!(target: "bridge-endpoint", renderer = self.renderer.renderer_id(), "bridge ready");
        self.registry.notify_ready();
    }
}

impl fmt::Debug for BridgeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeEndpoint")
            .field("renderer_id", &self.renderer_id())
            .field("ready", &self.is_ready())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn validate_channel(channel: &str) -> BridgeResult<&str> {
    if channel.trim().is_empty() {
        return Err(BridgeError::invalid_argument("channel must not be blank"));
    }
    Ok(channel)
}

fn dispatch_to_renderer(renderer: &dyn RendererHost, envelope: &str) {
    let script = codec::dispatch_script(envelope);
    let url = renderer.current_url();
    if let Err(err) = renderer.execute_script(&script, &url) {
        metrics::record_dispatch_failure();
        warn!(
            target: "bridge-endpoint",
            renderer = renderer.renderer_id(),
            error = %err,
            "failed to dispatch envelope to renderer"
        );
    }
}
