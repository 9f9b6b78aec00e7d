//! Multiplexes endpoints over renderer instances.
//!
//! Endpoints are indexed by instance (the address of the attached `Arc<dyn RendererHost>`)
//! with a secondary index on [`RendererHost::renderer_id`]. Hosts that hand out a fresh
//! `Arc` for the same renderer still find their endpoint: a primary miss falls back to the
//! identity index, then to a scan, and the primary index is repaired.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::endpoint::BridgeEndpoint;
use crate::error::{BridgeError, BridgeResult};
use crate::executor::HostExecutor;
use crate::options::BridgeOptions;
use crate::renderer::{QueryCallback, RendererHost};

type InstanceKey = usize;

fn instance_key(renderer: &Arc<dyn RendererHost>) -> InstanceKey {
    Arc::as_ptr(renderer) as *const () as usize
}

#[derive(Default)]
struct EndpointIndex {
    by_instance: HashMap<InstanceKey, BridgeEndpoint>,
    by_identity: HashMap<u64, InstanceKey>,
}

impl EndpointIndex {
    fn lookup(&mut self, renderer: &Arc<dyn RendererHost>) -> Option<BridgeEndpoint> {
        let key = instance_key(renderer);
        let identity = renderer.renderer_id();

        match self.by_instance.get(&key) {
            Some(endpoint) if endpoint.renderer_id() == identity => return Some(endpoint.clone()),
            // Address reused by a different renderer.
            Some(_) => return None,
            None => {}
        }

        let stale = self
            .by_identity
            .get(&identity)
            .copied()
            .filter(|stale| {
                self.by_instance
                    .get(stale)
                    .is_some_and(|endpoint| endpoint.renderer_id() == identity)
            })
            .or_else(|| {
                self.by_instance
                    .iter()
                    .find(|(_, endpoint)| endpoint.renderer_id() == identity)
                    .map(|(stale, _)| *stale)
            })?;

        let endpoint = self.by_instance.remove(&stale)?;
        self.by_instance.insert(key, endpoint.clone());
        self.by_identity.insert(identity, key);
        debug!(target: "bridge-runtime", renderer = identity, "repaired endpoint index");
        Some(endpoint)
    }

    fn remove(&mut self, renderer: &Arc<dyn RendererHost>) -> Option<BridgeEndpoint> {
        let endpoint = self.lookup(renderer)?;
        let key = instance_key(renderer);
        self.by_instance.remove(&key);
        self.by_identity.retain(|_, indexed| *indexed != key);
        Some(endpoint)
    }
}

pub struct BridgeRuntime {
    options: BridgeOptions,
    executor: Arc<dyn HostExecutor>,
    handle: Handle,
    endpoints: Mutex<EndpointIndex>,
    shutdown: CancellationToken,
}

impl BridgeRuntime {
    /// Creates a runtime bound to the current tokio runtime.
    pub fn new(options: BridgeOptions, executor: Arc<dyn HostExecutor>) -> BridgeResult<Self> {
        let handle = Handle::try_current().map_err(|_| BridgeError::NoAsyncRuntime)?;
        Ok(Self::with_handle(options, executor, handle))
    }

    pub fn with_handle(options: BridgeOptions, executor: Arc<dyn HostExecutor>, handle: Handle) -> Self {
        Self {
            options,
            executor,
            handle,
            endpoints: Mutex::new(EndpointIndex::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Creates a fresh endpoint for `renderer`. An endpoint already attached to the same
    /// renderer is closed after the swap.
    pub fn attach(&self, renderer: Arc<dyn RendererHost>) -> BridgeEndpoint {
        let endpoint = BridgeEndpoint::new(
            renderer.clone(),
            self.options.clone(),
            self.executor.clone(),
            self.handle.clone(),
        );
        let key = instance_key(&renderer);
        let identity = renderer.renderer_id();

        let replaced: Vec<BridgeEndpoint> = {
            let mut index = self.endpoints.lock();
            let mut replaced: Vec<BridgeEndpoint> = index.by_instance.insert(key, endpoint.clone()).into_iter().collect();
            // Identities that previously resolved to this instance no longer own it.
            index.by_identity.retain(|other, indexed| *indexed != key || *other == identity);
            if let Some(previous_key) = index.by_identity.insert(identity, key) {
                if previous_key != key {
                    replaced.extend(index.by_instance.remove(&previous_key));
                }
            }
            replaced
        };

        for previous in &replaced {
            previous.close();
        }
        info!(
            target: "bridge-runtime",
            renderer = identity,
            replaced = replaced.len(),
            "bridge endpoint attached"
        );
        endpoint
    }

    pub fn detach(&self, renderer: &Arc<dyn RendererHost>) -> bool {
        let removed = self.endpoints.lock().remove(renderer);
        match removed {
            Some(endpoint) => {
                endpoint.close();
                info!(target: "bridge-runtime", renderer = renderer.renderer_id(), "bridge endpoint detached");
                true
            }
            None => false,
        }
    }

    pub fn endpoint(&self, renderer: &Arc<dyn RendererHost>) -> Option<BridgeEndpoint> {
        self.endpoints.lock().lookup(renderer)
    }

    pub fn on_load_start(&self, renderer: &Arc<dyn RendererHost>) {
        if let Some(endpoint) = self.endpoint(renderer) {
            endpoint.on_navigation_requested();
        }
    }

    pub fn on_load_end(&self, renderer: &Arc<dyn RendererHost>) {
        if let Some(endpoint) = self.endpoint(renderer) {
            endpoint.on_page_load_end();
        }
    }

    /// Routes a renderer query. False means no endpoint claimed it.
    pub fn on_query(&self, renderer: &Arc<dyn RendererHost>, text: &str, callback: Arc<dyn QueryCallback>) -> bool {
        match self.endpoint(renderer) {
            Some(endpoint) => endpoint.handle_query(text, callback),
            None => false,
        }
    }

    pub fn on_query_canceled(&self, renderer: &Arc<dyn RendererHost>, query_id: i64) {
        if let Some(endpoint) = self.endpoint(renderer) {
            endpoint.on_query_canceled(query_id);
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.lock().by_instance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<BridgeEndpoint> {
        self.endpoints.lock().by_instance.values().cloned().collect()
    }

    /// Closes every endpoint and stops watchdogs spawned from this runtime.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let endpoints: Vec<BridgeEndpoint> = {
            let mut index = self.endpoints.lock();
            index.by_identity.clear();
            index.by_instance.drain().map(|(_, endpoint)| endpoint).collect()
        };
        for endpoint in &endpoints {
            endpoint.close();
        }
        info!(target: "bridge-runtime", closed = endpoints.len(), "bridge runtime shut down");
    }

    /// Periodically runs [`BridgeEndpoint::try_bootstrap_fallback`] on every attached
    /// endpoint until the handle is dropped or the runtime shuts down.
    pub fn spawn_bootstrap_watchdog(self: &Arc<Self>, period: Duration) -> WatchdogHandle {
        let runtime: Weak<Self> = Arc::downgrade(self);
        let cancel = self.shutdown.child_token();
        let loop_token = cancel.clone();
        let period = period.max(Duration::from_millis(1));
        let task = self.handle.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(runtime) = runtime.upgrade() else {
                            break;
                        };
                        let injected = runtime
                            .snapshot()
                            .iter()
                            .filter(|endpoint| endpoint.try_bootstrap_fallback())
                            .count();
                        if injected > 0 {
                            trace!(target: "bridge-runtime", injected, "bootstrap watchdog reinjected");
                        }
                    }
                }
            }
            debug!(target: "bridge-runtime", "bootstrap watchdog stopped");
        });
        WatchdogHandle {
            cancel,
            task: Some(task),
        }
    }
}

pub struct WatchdogHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    /// Stops the watchdog and waits for the loop to exit.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        match self.task.take() {
            Some(task) => match task.await {
                Ok(()) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            },
            None => Ok(()),
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
