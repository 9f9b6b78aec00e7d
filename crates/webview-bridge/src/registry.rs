//! Ready listeners, per-channel event listeners, and per-channel request handlers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::diagnostics::BridgeDiagnostics;
use crate::subscription::Subscription;

pub type ReadyListener = Arc<dyn Fn() + Send + Sync>;
/// Receives `(channel, payload_json)`.
pub type EventListener = Arc<dyn Fn(&str, &str) -> anyhow::Result<()> + Send + Sync>;
/// Resolves to the response payload as JSON text; `None` answers with `null`.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<Option<String>>>;
/// Receives `(channel, payload_json)`.
pub type RequestHandler = Arc<dyn Fn(&str, &str) -> HandlerFuture + Send + Sync>;

type ListenerId = u64;

pub struct HandlerRegistry {
    next_id: AtomicU64,
    ready: Mutex<Vec<(ListenerId, ReadyListener)>>,
    events: DashMap<String, Vec<(ListenerId, EventListener)>>,
    handlers: DashMap<String, (ListenerId, RequestHandler)>,
    diagnostics: Arc<dyn BridgeDiagnostics>,
}

impl HandlerRegistry {
    pub fn new(diagnostics: Arc<dyn BridgeDiagnostics>) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            ready: Mutex::new(Vec::new()),
            events: DashMap::new(),
            handlers: DashMap::new(),
            diagnostics,
        })
    }

    fn allocate_id(&self) -> ListenerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a ready listener. When `ready_now` is set it also runs immediately.
    pub fn on_ready(self: &Arc<Self>, listener: ReadyListener, ready_now: bool) -> Subscription {
        let id = self.allocate_id();
        let total = {
            let mut ready = self.ready.lock();
            ready.push((id, listener.clone()));
            ready.len()
        };
        debug!(target: "bridge-registry", total, ready_now, "registered ready listener");
        if ready_now {
            self.run_ready_listener(&listener);
        }

        let registry = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.ready.lock().retain(|(existing, _)| *existing != id);
            }
        })
    }

    pub fn on_event(self: &Arc<Self>, channel: &str, listener: EventListener) -> Subscription {
        let id = self.allocate_id();
        let total = {
            let mut listeners = self.events.entry(channel.to_string()).or_default();
            listeners.push((id, listener));
            listeners.len()
        };
        debug!(target: "bridge-registry", channel, total, "registered event listener");

        let registry = Arc::downgrade(self);
        let channel = channel.to_string();
        Subscription::new(move || remove_event_listener(&registry, &channel, id))
    }

    /// Installs the handler for `channel`, replacing any previous one.
    pub fn on_request(self: &Arc<Self>, channel: &str, handler: RequestHandler) -> Subscription {
        let id = self.allocate_id();
        let replaced = self
            .handlers
            .insert(channel.to_string(), (id, handler))
            .is_some();
        if replaced {
            warn!(target: "bridge-registry", channel, "replacing existing request handler");
            self.diagnostics.on_request_handler_replaced(channel);
        }
        debug!(target: "bridge-registry", channel, replaced, "registered request handler");

        let registry = Arc::downgrade(self);
        let channel = channel.to_string();
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                // A newer registration for the channel stays in place.
                registry
                    .handlers
                    .remove_if(&channel, |_, (existing, _)| *existing == id);
            }
        })
    }

    pub fn request_handler(&self, channel: &str) -> Option<RequestHandler> {
        self.handlers.get(channel).map(|entry| entry.1.clone())
    }

    pub fn has_event_listeners(&self, channel: &str) -> bool {
        self.events.contains_key(channel)
    }

    /// Invokes every listener for `channel`. Failures are reported and never stop the rest.
    pub fn dispatch_event(&self, channel: &str, payload_json: &str) {
        let listeners: Vec<EventListener> = match self.events.get(channel) {
            Some(entry) => entry.iter().map(|(_, listener)| listener.clone()).collect(),
            None => return,
        };

        for listener in &listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(channel, payload_json)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("{err:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };
            warn!(target: "bridge-registry", channel, error = %failure, "event listener failed");
            self.diagnostics.on_listener_failed(Some(channel), &failure);
        }

        debug!(
            target: "bridge-registry",
            channel,
            listeners = listeners.len(),
            payload_size = payload_json.len(),
            "dispatched inbound event"
        );
    }

    pub fn notify_ready(&self) {
        let listeners: Vec<ReadyListener> = self
            .ready
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        debug!(target: "bridge-registry", listeners = listeners.len(), "notifying ready listeners");
        for listener in &listeners {
            self.run_ready_listener(listener);
        }
    }

    pub fn clear(&self) {
        self.events.clear();
        self.handlers.clear();
        self.ready.lock().clear();
    }

    fn run_ready_listener(&self, listener: &ReadyListener) {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener())) {
            let failure = panic_message(panic.as_ref());
            warn!(target: "bridge-registry", error = %failure, "ready listener failed");
            self.diagnostics.on_listener_failed(None, &failure);
        }
    }
}

fn remove_event_listener(registry: &Weak<HandlerRegistry>, channel: &str, id: ListenerId) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    if let Some(mut listeners) = registry.events.get_mut(channel) {
        listeners.retain(|(existing, _)| *existing != id);
    }
    registry
        .events
        .remove_if(channel, |_, listeners| listeners.is_empty());
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "listener panicked".to_string()
    }
}
