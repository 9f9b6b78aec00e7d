//! In-process stand-in for an embedded renderer.
//!
//! [`SimulatedRenderer`] forwards every injected script to a content task that behaves like
//! the bundled bootstrap script: it reports `ready` once the bootstrap is injected, answers
//! `sum` and `echo` requests, ignores `slow`, and calls back into the host once per load.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use webview_bridge::{protocol, BridgeRuntime, ChannelCallback, QueryReply, RendererHost};

pub const SIMULATED_URL: &str = "https://soulbrowser.local/webview/index.html";

/// Channel the content side emits on after every successful bootstrap.
pub const CONTENT_READY_EVENT: &str = "content.ready";
/// Host request channel the content side calls after every successful bootstrap.
pub const HOST_VERSION_REQUEST: &str = "host.version";

pub struct SimulatedRenderer {
    id: u64,
    url: Mutex<String>,
    loaded: AtomicBool,
    scripts: mpsc::UnboundedSender<String>,
}

impl SimulatedRenderer {
    pub fn new(id: u64) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (scripts, rx) = mpsc::unbounded_channel();
        let renderer = Arc::new(Self {
            id,
            url: Mutex::new(SIMULATED_URL.to_string()),
            loaded: AtomicBool::new(false),
            scripts,
        });
        (renderer, rx)
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.loaded.store(loaded, Ordering::SeqCst);
    }

    pub fn navigate(&self, url: &str) {
        *self.url.lock() = url.to_string();
        self.set_loaded(false);
    }
}

impl RendererHost for SimulatedRenderer {
    fn renderer_id(&self) -> u64 {
        self.id
    }

    fn execute_script(&self, script: &str, _url: &str) -> Result<()> {
        self.scripts
            .send(script.to_string())
            .map_err(|_| anyhow!("simulated content side has stopped"))
    }

    fn current_url(&self) -> String {
        self.url.lock().clone()
    }

    fn has_document(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ContentStats {
    pub bootstraps: usize,
    pub events_received: Vec<String>,
    pub requests_answered: usize,
    pub requests_ignored: usize,
    pub host_answers: Vec<String>,
}

pub struct ContentSide {
    stats: Arc<Mutex<ContentStats>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ContentSide {
    /// Starts the content task. It stops on [`ContentSide::shutdown`] or when the renderer's
    /// script channel closes.
    pub fn spawn(
        runtime: Arc<BridgeRuntime>,
        renderer: Arc<dyn RendererHost>,
        scripts: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        let stats = Arc::new(Mutex::new(ContentStats::default()));
        let cancel = CancellationToken::new();
        let worker = ContentWorker {
            runtime,
            renderer,
            stats: stats.clone(),
        };
        let task = tokio::spawn(worker.run(scripts, cancel.clone()));
        Self { stats, cancel, task }
    }

    pub fn stats(&self) -> ContentStats {
        self.stats.lock().clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(target: "simulator", error = %err, "content task ended abnormally");
        }
    }
}

struct ContentWorker {
    runtime: Arc<BridgeRuntime>,
    renderer: Arc<dyn RendererHost>,
    stats: Arc<Mutex<ContentStats>>,
}

impl ContentWorker {
    async fn run(self, mut scripts: mpsc::UnboundedReceiver<String>, cancel: CancellationToken) {
        let mut host_seq = 0u64;
        loop {
            let script = tokio::select! {
                _ = cancel.cancelled() => break,
                script = scripts.recv() => match script {
                    Some(script) => script,
                    None => break,
                },
            };

            let outcome = match decode_dispatch(&script) {
                Some(envelope) => self.on_envelope(envelope).await,
                None => {
                    host_seq += 1;
                    self.on_bootstrap(host_seq).await
                }
            };
            if let Err(err) = outcome {
                warn!(target: "simulator", error = %err, "content side failed to handle script");
            }
        }
        debug!(target: "simulator", "content task stopped");
    }

    async fn on_bootstrap(&self, seq: u64) -> Result<()> {
        self.stats.lock().bootstraps += 1;
        self.query(frame("ready", json!({}))).await?;

        let url = self.renderer.current_url();
        self.query(frame(
            "event",
            json!({"channel": CONTENT_READY_EVENT, "payload": {"url": url}}),
        ))
        .await?;

        let reply = self
            .query(frame(
                "request",
                json!({"id": format!("js-{seq}"), "channel": HOST_VERSION_REQUEST, "payload": null}),
            ))
            .await?;
        if let QueryReply::Success(text) = reply {
            let response: Value = serde_json::from_str(&text).context("host response is not JSON")?;
            if response["ok"] == json!(true) {
                let version = response["payload"].as_str().unwrap_or_default().to_string();
                self.stats.lock().host_answers.push(version);
            }
        }
        Ok(())
    }

    async fn on_envelope(&self, envelope: Value) -> Result<()> {
        let kind = envelope["kind"].as_str().unwrap_or_default();
        let channel = envelope["channel"].as_str().unwrap_or_default().to_string();
        trace!(target: "simulator", kind, %channel, "content side received envelope");

        match kind {
            "event" => {
                self.stats.lock().events_received.push(channel);
                Ok(())
            }
            "request" => {
                let Some(id) = envelope["id"].as_str() else {
                    return Ok(());
                };
                let answer = match channel.as_str() {
                    "sum" => {
                        let a = envelope["payload"]["a"].as_i64().unwrap_or_default();
                        let b = envelope["payload"]["b"].as_i64().unwrap_or_default();
                        Some(json!({"ok": true, "payload": a + b}))
                    }
                    "echo" => Some(json!({"ok": true, "payload": envelope["payload"].clone()})),
                    "slow" => None,
                    other => Some(json!({
                        "ok": false,
                        "error": {
                            "code": protocol::codes::HANDLER_NOT_FOUND,
                            "message": format!("No handler for channel '{other}'"),
                        }
                    })),
                };

                let Some(mut answer) = answer else {
                    self.stats.lock().requests_ignored += 1;
                    return Ok(());
                };
                answer["id"] = json!(id);
                answer["channel"] = json!(channel);
                self.query(frame("response", answer)).await?;
                self.stats.lock().requests_answered += 1;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn query(&self, text: String) -> Result<QueryReply> {
        let (callback, rx) = ChannelCallback::new();
        if !self.runtime.on_query(&self.renderer, &text, Arc::new(callback)) {
            return Err(anyhow!("no bridge endpoint claimed the query"));
        }
        rx.await.context("bridge dropped the query callback")
    }
}

fn frame(kind: &str, fields: Value) -> String {
    let mut frame = json!({
        "bridge": protocol::NAME,
        "version": protocol::VERSION,
        "kind": kind,
    });
    if let (Some(target), Value::Object(fields)) = (frame.as_object_mut(), fields) {
        target.extend(fields);
    }
    frame.to_string()
}

/// Decodes a `window.<receive>("...")` dispatch script back into its envelope.
fn decode_dispatch(script: &str) -> Option<Value> {
    let quoted = script
        .strip_prefix("window.")?
        .strip_prefix(protocol::RECEIVE_FN)?
        .strip_prefix('(')?
        .strip_suffix(");")?;
    let text: String = serde_json::from_str(quoted).ok()?;
    serde_json::from_str(&text).ok()
}
