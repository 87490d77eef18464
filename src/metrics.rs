use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{core::Collector, Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::error;

use flockview_registry::metrics as registry_metrics;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

lazy_static! {
    static ref INSIGHTS_PUBLISHED: IntCounter = IntCounter::new(
        "flockview_insights_published_total",
        "Insight snapshots published to consumers"
    )
    .unwrap();
    static ref GROUPS_RECOMPUTED: IntCounter = IntCounter::new(
        "flockview_groups_recomputed_total",
        "Per-group metric recomputations"
    )
    .unwrap();
    static ref BENCHMARK_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "flockview_benchmark_subscriptions",
        "Benchmark sets currently subscribed"
    )
    .unwrap();
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register insights metric");
        }
    }
}

/// Registers every engine collector with the global registry, once per process.
pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        registry_metrics::register_metrics(registry);
        register(registry, INSIGHTS_PUBLISHED.clone());
        register(registry, GROUPS_RECOMPUTED.clone());
        register(registry, BENCHMARK_SUBSCRIPTIONS.clone());
    });
}

/// Text exposition of the global registry. Empty when encoding fails.
pub fn render_metrics() -> String {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(err) => {
            error!(?err, "prometheus exposition was not utf-8");
            String::new()
        }
    }
}

pub(crate) fn record_published() {
    INSIGHTS_PUBLISHED.inc();
}

pub(crate) fn record_recomputed(groups: usize) {
    GROUPS_RECOMPUTED.inc_by(groups as u64);
}

pub(crate) fn benchmark_opened() {
    BENCHMARK_SUBSCRIPTIONS.inc();
}

pub(crate) fn benchmarks_closed(count: usize) {
    BENCHMARK_SUBSCRIPTIONS.sub(count as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposition_lists_engine_metrics() {
        record_published();
        record_recomputed(2);
        let body = render_metrics();
        assert!(body.contains("flockview_insights_published_total"));
        assert!(body.contains("flockview_groups_recomputed_total"));
        assert!(body.contains("flockview_tracked_farms"));
    }
}
