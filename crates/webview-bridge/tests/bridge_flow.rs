use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serial_test::serial;
use tokio::runtime::Handle;
use webview_bridge::{
    metrics, protocol, BridgeEndpoint, BridgeError, BridgeOptions, BridgeRuntime, BroadcastDiagnostics,
    ChannelCallback, DiagnosticEvent, InlineExecutor, OverflowPolicy, QueryReply, RendererHost,
};

struct FakeRenderer {
    id: AtomicU64,
    url: Mutex<String>,
    has_document: AtomicBool,
    fail_scripts: AtomicBool,
    script_attempts: AtomicUsize,
    scripts: Mutex<Vec<String>>,
}

impl FakeRenderer {
    fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: AtomicU64::new(id),
            url: Mutex::new("https://app.test/index.html".into()),
            has_document: AtomicBool::new(true),
            fail_scripts: AtomicBool::new(false),
            script_attempts: AtomicUsize::new(0),
            scripts: Mutex::new(Vec::new()),
        })
    }

    /// Envelopes delivered through the receive function, in order.
    fn envelopes(&self) -> Vec<Value> {
        let prefix = format!("window.{}(", protocol::RECEIVE_FN);
        self.scripts
            .lock()
            .iter()
            .filter_map(|script| script.strip_prefix(&prefix))
            .filter_map(|rest| rest.strip_suffix(");"))
            .map(|quoted| {
                let text: String = serde_json::from_str(quoted).unwrap();
                serde_json::from_str(&text).unwrap()
            })
            .collect()
    }

    fn bootstrap_injections(&self) -> usize {
        let prefix = format!("window.{}(", protocol::RECEIVE_FN);
        self.scripts
            .lock()
            .iter()
            .filter(|script| !script.starts_with(&prefix))
            .count()
    }
}

impl RendererHost for FakeRenderer {
    fn renderer_id(&self) -> u64 {
        self.id.load(Ordering::SeqCst)
    }

    fn execute_script(&self, script: &str, _url: &str) -> anyhow::Result<()> {
        self.script_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_scripts.load(Ordering::SeqCst) {
            anyhow::bail!("renderer refused script");
        }
        self.scripts.lock().push(script.to_string());
        Ok(())
    }

    fn current_url(&self) -> String {
        self.url.lock().clone()
    }

    fn has_document(&self) -> bool {
        self.has_document.load(Ordering::SeqCst)
    }
}

fn endpoint(renderer: &Arc<FakeRenderer>, options: BridgeOptions) -> BridgeEndpoint {
    BridgeEndpoint::new(renderer.clone(), options, Arc::new(InlineExecutor), Handle::current())
}

fn frame(kind: &str, extra: Value) -> String {
    let mut frame = json!({"bridge": protocol::NAME, "version": protocol::VERSION, "kind": kind});
    if let (Some(frame), Some(extra)) = (frame.as_object_mut(), extra.as_object()) {
        frame.extend(extra.clone());
    }
    frame.to_string()
}

async fn query(endpoint: &BridgeEndpoint, text: &str) -> QueryReply {
    let (callback, rx) = ChannelCallback::new();
    assert!(endpoint.handle_query(text, Arc::new(callback)));
    rx.await.expect("query answered")
}

async fn mark_ready(endpoint: &BridgeEndpoint) {
    assert_eq!(query(endpoint, &frame("ready", json!({}))).await, QueryReply::Success("{}".into()));
}

#[tokio::test]
async fn events_before_ready_flush_in_order() {
    let renderer = FakeRenderer::new(1);
    let endpoint = endpoint(&renderer, BridgeOptions::default());

    endpoint.emit("a", "1").unwrap();
    endpoint.emit("b", "2").unwrap();
    endpoint.emit("c", "3").unwrap();
    assert!(renderer.envelopes().is_empty());
    assert_eq!(endpoint.queued_messages(), 3);

    mark_ready(&endpoint).await;
    endpoint.emit("d", "4").unwrap();

    let channels: Vec<Value> = renderer.envelopes().iter().map(|e| e["channel"].clone()).collect();
    assert_eq!(channels, vec![json!("a"), json!("b"), json!("c"), json!("d")]);
    assert!(endpoint.is_ready());
    assert_eq!(endpoint.queued_messages(), 0);
}

#[tokio::test]
async fn drop_oldest_keeps_the_newest_envelopes() {
    let renderer = FakeRenderer::new(2);
    let (diagnostics, mut events) = BroadcastDiagnostics::new(8);
    let options = BridgeOptions::builder()
        .max_queued_outbound_messages(2)
        .queue_overflow_policy(OverflowPolicy::DropOldest)
        .diagnostics(Arc::new(diagnostics))
        .build()
        .unwrap();
    let endpoint = endpoint(&renderer, options);

    for (channel, payload) in [("e1", "1"), ("e2", "2"), ("e3", "3")] {
        endpoint.emit(channel, payload).unwrap();
    }
    match events.recv().await.unwrap() {
        DiagnosticEvent::OutboundDropped { policy, capacity, message } => {
            assert_eq!(policy, OverflowPolicy::DropOldest);
            assert_eq!(capacity, 2);
            assert!(message.contains("e1"));
        }
        other => panic!("unexpected diagnostic: {other:?}"),
    }

    mark_ready(&endpoint).await;
    let payloads: Vec<Value> = renderer.envelopes().iter().map(|e| e["payload"].clone()).collect();
    assert_eq!(payloads, vec![json!(2), json!(3)]);
}

#[tokio::test]
async fn error_policy_rejects_emit_when_full() {
    let renderer = FakeRenderer::new(3);
    let options = BridgeOptions::builder()
        .max_queued_outbound_messages(1)
        .queue_overflow_policy(OverflowPolicy::Error)
        .build()
        .unwrap();
    let endpoint = endpoint(&renderer, options);

    endpoint.emit("a", "1").unwrap();
    assert_eq!(endpoint.emit("b", "2").unwrap_err(), BridgeError::QueueFull { capacity: 1 });
}

#[tokio::test]
async fn emit_validates_arguments() {
    let renderer = FakeRenderer::new(4);
    let endpoint = endpoint(&renderer, BridgeOptions::default());

    assert!(matches!(endpoint.emit("  ", "1"), Err(BridgeError::InvalidArgument(_))));
    assert!(matches!(endpoint.emit("a", "{nope"), Err(BridgeError::InvalidPayload(_))));
    assert_eq!(endpoint.queued_messages(), 0);
}

#[tokio::test(start_paused = true)]
async fn request_without_answer_times_out() {
    let renderer = FakeRenderer::new(5);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    mark_ready(&endpoint).await;

    let response = endpoint
        .request_with_timeout("slow", "{}", Duration::from_millis(50))
        .unwrap();
    assert_eq!(endpoint.pending_requests(), 1);

    let err = response.await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { ref channel, .. } if channel == "slow"));
    assert_eq!(endpoint.pending_requests(), 0);
}

#[tokio::test]
async fn request_rejects_zero_timeout() {
    let renderer = FakeRenderer::new(6);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    assert!(matches!(
        endpoint.request_with_timeout("sum", "{}", Duration::ZERO),
        Err(BridgeError::InvalidArgument(_))
    ));
}

#[derive(Serialize, Deserialize)]
struct SumArgs {
    a: i64,
    b: i64,
}

#[tokio::test]
async fn queued_request_round_trips_after_ready() {
    let renderer = FakeRenderer::new(7);
    let endpoint = endpoint(&renderer, BridgeOptions::default());

    let response = endpoint
        .request_json::<_, i64>("sum", &SumArgs { a: 2, b: 3 })
        .unwrap();
    assert_eq!(response.id(), "host-1");
    mark_ready(&endpoint).await;

    let sent = renderer.envelopes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["kind"], "request");
    assert_eq!(sent[0]["payload"], json!({"a": 2, "b": 3}));

    let reply = frame(
        "response",
        json!({"id": sent[0]["id"], "channel": "sum", "ok": true, "payload": 5}),
    );
    assert_eq!(query(&endpoint, &reply).await, QueryReply::Success("{}".into()));
    assert_eq!(response.await.unwrap(), 5);
}

#[tokio::test]
async fn explicit_failure_surfaces_remote_error() {
    let renderer = FakeRenderer::new(8);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    mark_ready(&endpoint).await;

    let response = endpoint.request("explode", "null").unwrap();
    let reply = frame(
        "response",
        json!({
            "id": response.id(),
            "channel": "explode",
            "ok": false,
            "error": {"code": "boom", "message": "it broke"}
        }),
    );
    query(&endpoint, &reply).await;

    match response.await.unwrap_err() {
        BridgeError::Remote { code, message, channel, .. } => {
            assert_eq!(code, "boom");
            assert_eq!(message, "it broke");
            assert_eq!(channel.as_deref(), Some("explode"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn navigation_invalidates_pending_and_readiness() {
    let renderer = FakeRenderer::new(9);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    mark_ready(&endpoint).await;

    let response = endpoint.request("sum", "{}").unwrap();
    let id = response.id().to_string();
    endpoint.on_navigation_requested();

    assert!(!endpoint.is_ready());
    assert_eq!(response.await.unwrap_err(), BridgeError::PageChanged);

    // A late answer for an invalidated request is acknowledged and ignored.
    let late = frame("response", json!({"id": id, "ok": true, "payload": 1}));
    assert_eq!(query(&endpoint, &late).await, QueryReply::Success("{}".into()));

    endpoint.emit("after", "true").unwrap();
    assert_eq!(endpoint.queued_messages(), 1);
}

#[tokio::test]
async fn duplicate_responses_resolve_once() {
    let renderer = FakeRenderer::new(10);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    mark_ready(&endpoint).await;

    let response = endpoint.request("sum", "{}").unwrap();
    let id = response.id().to_string();
    query(&endpoint, &frame("response", json!({"id": id, "ok": true, "payload": "first"}))).await;
    query(&endpoint, &frame("response", json!({"id": id, "ok": true, "payload": "second"}))).await;

    assert_eq!(response.await.unwrap(), "\"first\"");
}

#[tokio::test]
async fn close_is_idempotent_and_final() {
    let renderer = FakeRenderer::new(11);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    endpoint.emit("queued", "1").unwrap();
    let response = endpoint.request("sum", "{}").unwrap();

    endpoint.close();
    endpoint.close();

    assert!(endpoint.is_closed());
    assert_eq!(endpoint.queued_messages(), 0);
    assert_eq!(response.await.unwrap_err(), BridgeError::Closed);
    assert_eq!(endpoint.emit("x", "1").unwrap_err(), BridgeError::Closed);
    assert_eq!(endpoint.request("x", "1").unwrap_err(), BridgeError::Closed);
    assert!(endpoint.on_event("x", |_: &str, _: &str| Ok(())).is_err());

    let (callback, _rx) = ChannelCallback::new();
    assert!(!endpoint.handle_query(&frame("ready", json!({})), Arc::new(callback)));
    assert!(renderer.envelopes().is_empty());
}

#[tokio::test]
async fn inbound_events_reach_listeners_until_unsubscribed() {
    let renderer = FakeRenderer::new(12);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let subscription = endpoint
        .on_event("clicked", move |_: &str, payload: &str| -> anyhow::Result<()> {
            sink.lock().push(payload.to_string());
            Ok(())
        })
        .unwrap();

    let event = frame("event", json!({"channel": "clicked", "payload": {"x": 1}}));
    query(&endpoint, &event).await;
    subscription.unsubscribe();
    query(&endpoint, &event).await;

    assert_eq!(*seen.lock(), vec![r#"{"x":1}"#.to_string()]);
}

#[tokio::test]
async fn ready_listener_fires_per_transition() {
    let renderer = FakeRenderer::new(13);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let _subscription = endpoint
        .on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    mark_ready(&endpoint).await;
    endpoint.on_navigation_requested();
    mark_ready(&endpoint).await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let late = Arc::new(AtomicUsize::new(0));
    let late_counter = late.clone();
    let _late = endpoint
        .on_ready(move || {
            late_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn typed_request_handler_answers_content() {
    let renderer = FakeRenderer::new(14);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    let _handler = endpoint
        .on_request_json("sum", |args: SumArgs| async move { Ok::<_, anyhow::Error>(args.a + args.b) })
        .unwrap();

    let request = frame("request", json!({"id": "js-1", "channel": "sum", "payload": {"a": 2, "b": 3}}));
    let reply = match query(&endpoint, &request).await {
        QueryReply::Success(text) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(reply["kind"], "response");
    assert_eq!(reply["id"], "js-1");
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["payload"], 5);

    let bad = frame("request", json!({"id": "js-2", "channel": "sum", "payload": "nope"}));
    let reply = match query(&endpoint, &bad).await {
        QueryReply::Success(text) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], protocol::codes::HOST_HANDLER_ERROR);
}

#[tokio::test]
async fn typed_event_listener_decodes_payload() {
    let renderer = FakeRenderer::new(15);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    let total = Arc::new(AtomicUsize::new(0));
    let sink = total.clone();
    let _listener = endpoint
        .on_event_json("sum", move |args: SumArgs| -> anyhow::Result<()> {
            sink.store((args.a + args.b) as usize, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    query(&endpoint, &frame("event", json!({"channel": "sum", "payload": {"a": 4, "b": 5}}))).await;
    assert_eq!(total.load(Ordering::SeqCst), 9);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_fallback_respects_retry_interval() {
    let renderer = FakeRenderer::new(16);
    let options = BridgeOptions::builder()
        .bootstrap_retry_interval(Duration::from_millis(200))
        .build()
        .unwrap();
    let endpoint = endpoint(&renderer, options);

    endpoint.on_page_load_end();
    assert_eq!(renderer.bootstrap_injections(), 1);
    assert!(!endpoint.try_bootstrap_fallback());

    tokio::time::advance(Duration::from_millis(250)).await;
    assert!(endpoint.try_bootstrap_fallback());
    assert_eq!(renderer.bootstrap_injections(), 2);

    *renderer.url.lock() = "https://app.test/next.html".into();
    assert!(endpoint.try_bootstrap_fallback());

    mark_ready(&endpoint).await;
    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(!endpoint.try_bootstrap_fallback());

    renderer.has_document.store(false, Ordering::SeqCst);
    endpoint.on_navigation_requested();
    assert!(!endpoint.try_bootstrap_fallback());
}

#[tokio::test(start_paused = true)]
async fn failed_bootstrap_injection_is_retried_by_fallback() {
    let renderer = FakeRenderer::new(17);
    renderer.fail_scripts.store(true, Ordering::SeqCst);
    let options = BridgeOptions::builder()
        .bootstrap_retry_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let endpoint = endpoint(&renderer, options);

    endpoint.on_page_load_end();
    assert_eq!(renderer.script_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.bootstrap_injections(), 0);
    assert!(!endpoint.is_ready());
    assert!(!endpoint.is_closed());

    renderer.fail_scripts.store(false, Ordering::SeqCst);
    tokio::time::advance(Duration::from_millis(150)).await;
    assert!(endpoint.try_bootstrap_fallback());
    assert_eq!(renderer.script_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(renderer.bootstrap_injections(), 1);
    assert!(!endpoint.is_ready());

    mark_ready(&endpoint).await;
    assert!(endpoint.is_ready());
}

#[tokio::test]
async fn numeric_request_ids_are_answered_as_text() {
    let renderer = FakeRenderer::new(18);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    let _handler = endpoint
        .on_request_json("sum", |args: SumArgs| async move { Ok::<_, anyhow::Error>(args.a + args.b) })
        .unwrap();

    let request = frame("request", json!({"id": 7, "channel": "sum", "payload": {"a": 1, "b": 1}}));
    let reply = match query(&endpoint, &request).await {
        QueryReply::Success(text) => serde_json::from_str::<Value>(&text).unwrap(),
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(reply["id"], "7");
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["payload"], 2);
}

#[tokio::test]
async fn ready_frame_without_version_is_accepted() {
    let renderer = FakeRenderer::new(19);
    let endpoint = endpoint(&renderer, BridgeOptions::default());

    let ready = json!({"bridge": protocol::NAME, "kind": "ready"}).to_string();
    assert_eq!(query(&endpoint, &ready).await, QueryReply::Success("{}".into()));
    assert!(endpoint.is_ready());
}

#[tokio::test]
async fn overflow_fails_queued_request_without_waiting_for_timeout() {
    let renderer = FakeRenderer::new(24);
    let options = BridgeOptions::builder()
        .max_queued_outbound_messages(1)
        .queue_overflow_policy(OverflowPolicy::DropOldest)
        .build()
        .unwrap();
    let endpoint = endpoint(&renderer, options);

    let response = endpoint
        .request_with_timeout("sum", "{}", Duration::from_secs(3600))
        .unwrap();
    let id = response.id().to_string();
    endpoint.emit("news", "1").unwrap();

    let err = tokio::time::timeout(Duration::from_secs(1), response)
        .await
        .expect("settled without waiting for the request timeout")
        .unwrap_err();
    assert_eq!(err, BridgeError::Dropped { id, capacity: 1 });
    assert_eq!(endpoint.pending_requests(), 0);
    assert_eq!(endpoint.queued_messages(), 1);
}

#[tokio::test]
async fn runtime_attach_replace_and_detach() {
    let runtime = BridgeRuntime::new(BridgeOptions::default(), Arc::new(InlineExecutor)).unwrap();
    let renderer: Arc<dyn RendererHost> = FakeRenderer::new(20);

    let first = runtime.attach(renderer.clone());
    assert!(runtime.endpoint(&renderer).unwrap().ptr_eq(&first));

    let second = runtime.attach(renderer.clone());
    assert!(first.is_closed());
    assert!(!second.is_closed());
    assert_eq!(runtime.len(), 1);

    let (callback, rx) = ChannelCallback::new();
    assert!(runtime.on_query(&renderer, &frame("ready", json!({})), Arc::new(callback)));
    assert_eq!(rx.await.unwrap(), QueryReply::Success("{}".into()));
    assert!(second.is_ready());

    runtime.on_load_start(&renderer);
    assert!(!second.is_ready());

    assert!(runtime.detach(&renderer));
    assert!(second.is_closed());
    assert!(!runtime.detach(&renderer));
    assert!(runtime.is_empty());

    let (callback, _rx) = ChannelCallback::new();
    assert!(!runtime.on_query(&renderer, &frame("ready", json!({})), Arc::new(callback)));
}

#[tokio::test]
async fn runtime_finds_endpoint_through_fresh_instance() {
    let runtime = BridgeRuntime::new(BridgeOptions::default(), Arc::new(InlineExecutor)).unwrap();
    let first_instance: Arc<dyn RendererHost> = FakeRenderer::new(21);
    let endpoint = runtime.attach(first_instance.clone());

    // Same renderer identity, different instance reference.
    let fresh: Arc<dyn RendererHost> = FakeRenderer::new(21);
    let found = runtime.endpoint(&fresh).expect("endpoint found by identity");
    assert!(found.ptr_eq(&endpoint));
    assert!(runtime.endpoint(&fresh).unwrap().ptr_eq(&endpoint));

    let stranger: Arc<dyn RendererHost> = FakeRenderer::new(22);
    assert!(runtime.endpoint(&stranger).is_none());

    runtime.shutdown();
    assert!(endpoint.is_closed());
    assert!(runtime.is_empty());
    drop(first_instance);
}

#[tokio::test]
async fn reassigned_instance_does_not_answer_for_its_old_identity() {
    let runtime = BridgeRuntime::new(BridgeOptions::default(), Arc::new(InlineExecutor)).unwrap();
    let renderer = FakeRenderer::new(25);
    let host: Arc<dyn RendererHost> = renderer.clone();

    let first = runtime.attach(host.clone());
    renderer.id.store(26, Ordering::SeqCst);
    let second = runtime.attach(host.clone());
    assert!(first.is_closed());
    assert_eq!(runtime.len(), 1);

    let old_identity: Arc<dyn RendererHost> = FakeRenderer::new(25);
    assert!(runtime.endpoint(&old_identity).is_none());
    assert!(runtime.endpoint(&host).unwrap().ptr_eq(&second));

    let current_identity: Arc<dyn RendererHost> = FakeRenderer::new(26);
    assert!(runtime.endpoint(&current_identity).unwrap().ptr_eq(&second));
    assert!(runtime.endpoint(&old_identity).is_none());
}

#[tokio::test(start_paused = true)]
async fn watchdog_reinjects_until_ready() {
    let options = BridgeOptions::builder()
        .bootstrap_retry_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    let runtime = Arc::new(BridgeRuntime::new(options, Arc::new(InlineExecutor)).unwrap());
    let renderer = FakeRenderer::new(30);
    let host: Arc<dyn RendererHost> = renderer.clone();
    let endpoint = runtime.attach(host);

    let watchdog = runtime.spawn_bootstrap_watchdog(Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(350)).await;
    let before_ready = renderer.bootstrap_injections();
    assert!(before_ready >= 2, "injections: {before_ready}");

    mark_ready(&endpoint).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(renderer.bootstrap_injections(), before_ready);

    watchdog.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn counters_track_traffic() {
    let renderer = FakeRenderer::new(40);
    let endpoint = endpoint(&renderer, BridgeOptions::default());
    let before = metrics::snapshot();

    endpoint.emit("a", "1").unwrap();
    mark_ready(&endpoint).await;
    endpoint.emit("b", "2").unwrap();
    let response = endpoint.request("sum", "{}").unwrap();
    query(&endpoint, &frame("response", json!({"id": response.id(), "ok": true, "payload": 0}))).await;
    response.await.unwrap();

    let after = metrics::snapshot();
    assert!(after.events_emitted >= before.events_emitted + 2);
    assert!(after.messages_dispatched >= before.messages_dispatched + 3);
    assert!(after.requests_started >= before.requests_started + 1);
    assert!(after.requests_succeeded >= before.requests_succeeded + 1);
    assert!(after.queries_routed >= before.queries_routed + 2);
}
