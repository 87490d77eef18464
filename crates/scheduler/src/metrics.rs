use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counters {
    pushed: AtomicU64,
    coalesced: AtomicU64,
    fired: AtomicU64,
    cancelled: AtomicU64,
}

static COUNTERS: Lazy<Counters> = Lazy::new(Counters::default);

fn increment(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

pub fn record_pushed() {
    increment(&COUNTERS.pushed, 1);
}

pub fn record_coalesced() {
    increment(&COUNTERS.coalesced, 1);
}

pub fn record_fired() {
    increment(&COUNTERS.fired, 1);
}

pub fn record_cancelled(count: u64) {
    increment(&COUNTERS.cancelled, count);
}

/// Process-wide totals across every coalescer.
#[derive(Clone, Debug, Default)]
pub struct SchedulerMetricsSnapshot {
    pub pushed: u64,
    pub coalesced: u64,
    pub fired: u64,
    pub cancelled: u64,
}

pub fn snapshot() -> SchedulerMetricsSnapshot {
    SchedulerMetricsSnapshot {
        pushed: COUNTERS.pushed.load(Ordering::Relaxed),
        coalesced: COUNTERS.coalesced.load(Ordering::Relaxed),
        fired: COUNTERS.fired.load(Ordering::Relaxed),
        cancelled: COUNTERS.cancelled.load(Ordering::Relaxed),
    }
}
