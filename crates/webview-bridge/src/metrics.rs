use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    events_emitted: AtomicU64,
    messages_queued: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_dropped: AtomicU64,
    dispatch_failures: AtomicU64,
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    requests_timed_out: AtomicU64,
    queries_routed: AtomicU64,
    queries_ignored: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn record_event_emitted() {
    increment(&COUNTERS.events_emitted);
}

pub fn record_queued() {
    increment(&COUNTERS.messages_queued);
}

pub fn record_dispatched() {
    increment(&COUNTERS.messages_dispatched);
}

pub fn record_dropped() {
    increment(&COUNTERS.messages_dropped);
}

pub fn record_dispatch_failure() {
    increment(&COUNTERS.dispatch_failures);
}

pub fn record_request_started() {
    increment(&COUNTERS.requests_started);
}

pub fn record_request_succeeded() {
    increment(&COUNTERS.requests_succeeded);
}

pub fn record_request_failed() {
    increment(&COUNTERS.requests_failed);
}

pub fn record_request_timed_out() {
    increment(&COUNTERS.requests_timed_out);
}

pub fn record_query(routed: bool) {
    if routed {
        increment(&COUNTERS.queries_routed);
    } else {
        increment(&COUNTERS.queries_ignored);
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BridgeMetricsSnapshot {
    pub events_emitted: u64,
    pub messages_queued: u64,
    pub messages_dispatched: u64,
    pub messages_dropped: u64,
    pub dispatch_failures: u64,
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
    pub queries_routed: u64,
    pub queries_ignored: u64,
}

pub fn snapshot() -> BridgeMetricsSnapshot {
    BridgeMetricsSnapshot {
        events_emitted: COUNTERS.events_emitted.load(Ordering::Relaxed),
        messages_queued: COUNTERS.messages_queued.load(Ordering::Relaxed),
        messages_dispatched: COUNTERS.messages_dispatched.load(Ordering::Relaxed),
        messages_dropped: COUNTERS.messages_dropped.load(Ordering::Relaxed),
        dispatch_failures: COUNTERS.dispatch_failures.load(Ordering::Relaxed),
        requests_started: COUNTERS.requests_started.load(Ordering::Relaxed),
        requests_succeeded: COUNTERS.requests_succeeded.load(Ordering::Relaxed),
        requests_failed: COUNTERS.requests_failed.load(Ordering::Relaxed),
        requests_timed_out: COUNTERS.requests_timed_out.load(Ordering::Relaxed),
        queries_routed: COUNTERS.queries_routed.load(Ordering::Relaxed),
        queries_ignored: COUNTERS.queries_ignored.load(Ordering::Relaxed),
    }
}
