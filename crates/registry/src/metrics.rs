use flockview_core_types::{FaultKind, MergePoint};
use lazy_static::lazy_static;
use prometheus::{core::Collector, opts, IntCounterVec, IntGauge, Registry};
use tracing::error;

lazy_static! {
    static ref TRACKED_FARMS: IntGauge =
        IntGauge::new("flockview_tracked_farms", "Farm subscriptions currently open").unwrap();
    static ref TRACKED_GROUPS: IntGauge =
        IntGauge::new("flockview_tracked_groups", "Group subscriptions currently open").unwrap();
    static ref REPUBLISH_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "flockview_republish_total",
            "Merged view swaps grouped by merge point"
        ),
        &["merge_point"]
    )
    .unwrap();
    static ref REPUBLISH_SUPPRESSED_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!(
            "flockview_republish_suppressed_total",
            "Coalesced unions dropped because their signature was unchanged"
        ),
        &["merge_point"]
    )
    .unwrap();
    static ref FAULTS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("flockview_faults_total", "Soft faults grouped by kind"),
        &["kind"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register registry metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, TRACKED_FARMS.clone());
    register(registry, TRACKED_GROUPS.clone());
    register(registry, REPUBLISH_TOTAL.clone());
    register(registry, REPUBLISH_SUPPRESSED_TOTAL.clone());
    register(registry, FAULTS_TOTAL.clone());
}

pub fn farm_opened() {
    TRACKED_FARMS.inc();
}

pub fn farms_closed(count: usize) {
    TRACKED_FARMS.sub(count as i64);
}

pub fn group_opened() {
    TRACKED_GROUPS.inc();
}

pub fn groups_closed(count: usize) {
    TRACKED_GROUPS.sub(count as i64);
}

pub fn record_republish(merge_point: MergePoint) {
    REPUBLISH_TOTAL
        .with_label_values(&[merge_point.as_str()])
        .inc();
}

pub fn record_suppressed(merge_point: MergePoint) {
    REPUBLISH_SUPPRESSED_TOTAL
        .with_label_values(&[merge_point.as_str()])
        .inc();
}

pub fn record_fault(kind: FaultKind) {
    FAULTS_TOTAL.with_label_values(&[kind.as_str()]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_idempotent() {
        let registry = Registry::new();
        register_metrics(&registry);
        register_metrics(&registry);
        record_fault(FaultKind::Decode);
        record_republish(MergePoint::Groups);
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"flockview_faults_total".to_string()));
        assert!(names.contains(&"flockview_republish_total".to_string()));
    }
}
