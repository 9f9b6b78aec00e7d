use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};
use webview_bridge::{metrics, BridgeMetricsSnapshot, BridgeRuntime, HostLoop, RendererHost};

use super::context::CliContext;
use super::output::OutputFormat;
use crate::simulator::{
    ContentSide, SimulatedRenderer, CONTENT_READY_EVENT, HOST_VERSION_REQUEST, SIMULATED_URL,
};

const RENDERER_ID: u64 = 1;
const TICK_CHANNEL: &str = "host.tick";

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of `sum` requests sent before the page is ready
    #[arg(long, default_value_t = 3)]
    pub requests: usize,

    /// Number of events emitted before the page is ready
    #[arg(long, default_value_t = 3)]
    pub events: usize,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 500)]
    pub timeout_ms: u64,

    /// Navigate while a request is in flight instead of letting it time out
    #[arg(long)]
    pub navigate_midway: bool,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub renderer_id: u64,
    pub events_emitted: usize,
    pub events_delivered: usize,
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub request_failures: Vec<String>,
    pub echo_round_trip: bool,
    pub in_flight_outcome: String,
    pub content_ready_events: usize,
    pub host_versions_served: Vec<String>,
    pub bootstraps: usize,
    pub metrics: BridgeMetricsSnapshot,
}

pub async fn cmd_simulate(args: SimulateArgs, ctx: &CliContext, output: OutputFormat) -> Result<()> {
    let timeout = Duration::from_millis(args.timeout_ms.max(1));
    let options = ctx.bridge_options()?;
    let retry_interval = options.bootstrap_retry_interval();

    let (host_loop, host_task) = HostLoop::spawn(&Handle::current());
    let runtime = Arc::new(BridgeRuntime::new(options, Arc::new(host_loop))?);
    let watchdog = runtime.spawn_bootstrap_watchdog(retry_interval);

    let (renderer, scripts) = SimulatedRenderer::new(RENDERER_ID);
    let host: Arc<dyn RendererHost> = renderer.clone();
    let content = ContentSide::spawn(runtime.clone(), host.clone(), scripts);
    let endpoint = runtime.attach(host.clone());

    let content_ready = Arc::new(AtomicUsize::new(0));
    let seen = content_ready.clone();
    let _ready_events = endpoint.on_event(CONTENT_READY_EVENT, move |_: &str, _: &str| -> anyhow::Result<()> {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })?;
    let _version_handler = endpoint.on_request_json(HOST_VERSION_REQUEST, |_: Value| async {
        Ok::<_, anyhow::Error>(env!("CARGO_PKG_VERSION"))
    })?;

    // Queued until the content side reports ready.
    for index in 0..args.events {
        endpoint.emit_json(TICK_CHANNEL, &json!({ "index": index }))?;
    }
    let mut sums = Vec::with_capacity(args.requests);
    for index in 0..args.requests {
        let (a, b) = (index as i64, index as i64 * 10);
        let response = endpoint.request_json_with_timeout::<_, i64>("sum", &json!({ "a": a, "b": b }), timeout)?;
        sums.push((a + b, response));
    }
    info!(
        target: "simulator",
        queued = endpoint.queued_messages(),
        pending = endpoint.pending_requests(),
        "page loading"
    );

    renderer.set_loaded(true);
    runtime.on_load_end(&host);

    let mut requests_succeeded = 0;
    let mut request_failures = Vec::new();
    let outcomes = join_all(
        sums.into_iter()
            .map(|(expected, response)| async move { (expected, response.await) }),
    )
    .await;
    for (expected, outcome) in outcomes {
        match outcome {
            Ok(sum) if sum == expected => requests_succeeded += 1,
            Ok(sum) => request_failures.push(format!("unexpected_sum: {sum} != {expected}")),
            Err(err) => request_failures.push(err.code().to_string()),
        }
    }

    let echo_payload = json!({ "hello": "webview" });
    let echo = endpoint
        .request_json_with_timeout::<_, Value>("echo", &echo_payload, timeout)?
        .await;
    let echo_round_trip = matches!(&echo, Ok(value) if *value == echo_payload);

    let in_flight = endpoint.request_with_timeout("slow", "null", timeout)?;
    let in_flight_outcome = if args.navigate_midway {
        renderer.navigate(&format!("{SIMULATED_URL}#reloaded"));
        runtime.on_load_start(&host);
        let outcome = in_flight.await;
        renderer.set_loaded(true);
        runtime.on_load_end(&host);
        if !wait_until(timeout, || endpoint.is_ready()).await {
            warn!(target: "simulator", "bridge did not become ready after navigation");
        }
        outcome
    } else {
        in_flight.await
    };
    let in_flight_outcome = match in_flight_outcome {
        Ok(_) => "answered".to_string(),
        Err(err) => err.code().to_string(),
    };

    wait_until(timeout, || !content.stats().host_answers.is_empty()).await;
    let stats = content.stats();

    let report = SimulationReport {
        renderer_id: RENDERER_ID,
        events_emitted: args.events,
        events_delivered: stats
            .events_received
            .iter()
            .filter(|channel| channel.as_str() == TICK_CHANNEL)
            .count(),
        requests_sent: args.requests,
        requests_succeeded,
        request_failures,
        echo_round_trip,
        in_flight_outcome,
        content_ready_events: content_ready.load(Ordering::SeqCst),
        host_versions_served: stats.host_answers,
        bootstraps: stats.bootstraps,
        metrics: metrics::snapshot(),
    };

    runtime.detach(&host);
    runtime.shutdown();
    watchdog.shutdown().await.context("bootstrap watchdog failed")?;
    content.shutdown().await;
    drop(endpoint);
    drop(runtime);
    if tokio::time::timeout(Duration::from_secs(1), host_task).await.is_err() {
        warn!(target: "simulator", "host loop did not stop in time");
    }

    print_report(&report, output)?;
    if report.requests_succeeded != report.requests_sent || !report.echo_round_trip {
        bail!(
            "simulation finished with {} failed request(s)",
            report.requests_sent - report.requests_succeeded + usize::from(!report.echo_round_trip)
        );
    }
    Ok(())
}

fn print_report(report: &SimulationReport, output: OutputFormat) -> Result<()> {
    if let Some(rendered) = output.render(report)? {
        println!("{rendered}");
        return Ok(());
    }

    println!("Simulated renderer {}", report.renderer_id);
    println!(
        "  events:      {} emitted, {} delivered",
        report.events_emitted, report.events_delivered
    );
    println!(
        "  requests:    {} sent, {} succeeded",
        report.requests_sent, report.requests_succeeded
    );
    for failure in &report.request_failures {
        println!("    failed: {failure}");
    }
    println!("  echo:        {}", if report.echo_round_trip { "ok" } else { "mismatch" });
    println!("  in flight:   {}", report.in_flight_outcome);
    println!(
        "  content:     {} bootstrap(s), {} ready event(s), host version {}",
        report.bootstraps,
        report.content_ready_events,
        report.host_versions_served.first().map(String::as_str).unwrap_or("-")
    );
    let metrics = &report.metrics;
    println!(
        "  metrics:     queued={} dispatched={} dropped={} timed_out={} routed={}",
        metrics.messages_queued,
        metrics.messages_dispatched,
        metrics.messages_dropped,
        metrics.requests_timed_out,
        metrics.queries_routed
    );
    Ok(())
}

async fn wait_until<F>(limit: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + limit;
    while !condition() {
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(5)).await;
    }
    true
}
