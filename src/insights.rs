//! Derived group performance kept in step with the published merged view.
//!
//! The worker never reads the store. It reacts to three inputs: a new merged view, a
//! replaced benchmark set, and a policy change. Only groups whose inputs changed are
//! recomputed, and one snapshot is published per reaction.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use flockview_core_types::{
    Farm, FarmId, FaultSignal, FlockError, GroupId, OperationalEvent, OwnerId, ScopeKey,
};
use flockview_event_bus::InMemoryBus;
use flockview_performance::{
    calculate_checked, partition_by_group, AggregateTotals, BenchmarkComparator, BenchmarkKey,
    BenchmarkSet, DerivedMetric, RankScale,
};
use flockview_policy_center::EnginePolicy;
use flockview_registry::MergedView;
use flockview_state_center::{StateCenter, StateEvent};

use crate::benchmark::BenchmarkStore;
use crate::metrics;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupPerformance {
    Ready {
        totals: AggregateTotals,
        metrics: Vec<DerivedMetric>,
    },
    /// Nothing mated yet; metrics are withheld instead of reported as zero.
    InsufficientData,
}

impl GroupPerformance {
    pub fn metrics(&self) -> Option<&[DerivedMetric]> {
        match self {
            GroupPerformance::Ready { metrics, .. } => Some(metrics),
            GroupPerformance::InsufficientData => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupInsight {
    pub group_id: GroupId,
    pub farm_id: FarmId,
    pub name: String,
    /// `None` when the group has no breed or its farm no region.
    pub benchmark_key: Option<BenchmarkKey>,
    pub benchmarked: bool,
    pub performance: GroupPerformance,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct InsightsSnapshot {
    pub revision: u64,
    /// Revision of the merged view these insights were derived from.
    pub view_revision: u64,
    pub rank_scale: RankScale,
    pub groups: BTreeMap<GroupId, GroupInsight>,
}

impl InsightsSnapshot {
    pub fn group(&self, id: &GroupId) -> Option<&GroupInsight> {
        self.groups.get(id)
    }
}

#[derive(Clone, Debug, PartialEq)]
struct GroupInput {
    farm_id: FarmId,
    name: String,
    key: Option<BenchmarkKey>,
    totals: AggregateTotals,
}

struct BenchmarkSubscription {
    seq: u64,
    token: CancellationToken,
    latest: Option<BenchmarkSet>,
}

struct BenchmarkUpdate {
    key: BenchmarkKey,
    seq: u64,
    set: Option<BenchmarkSet>,
}

pub(crate) struct InsightsWorker {
    owner: OwnerId,
    benchmarks: Arc<dyn BenchmarkStore>,
    comparator: BenchmarkComparator,
    inputs: BTreeMap<GroupId, GroupInput>,
    insights: BTreeMap<GroupId, GroupInsight>,
    subscriptions: HashMap<BenchmarkKey, BenchmarkSubscription>,
    next_seq: u64,
    updates_tx: mpsc::UnboundedSender<BenchmarkUpdate>,
    updates_rx: mpsc::UnboundedReceiver<BenchmarkUpdate>,
    out: watch::Sender<Arc<InsightsSnapshot>>,
    bus: Arc<InMemoryBus<FaultSignal>>,
    state_center: Arc<dyn StateCenter>,
    cancel: CancellationToken,
    view_revision: u64,
}

impl InsightsWorker {
    pub(crate) fn new(
        owner: OwnerId,
        benchmarks: Arc<dyn BenchmarkStore>,
        rank_scale: RankScale,
        bus: Arc<InMemoryBus<FaultSignal>>,
        state_center: Arc<dyn StateCenter>,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<Arc<InsightsSnapshot>>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (out, rx) = watch::channel(Arc::new(InsightsSnapshot {
            rank_scale,
            ..InsightsSnapshot::default()
        }));
        let worker = Self {
            owner,
            benchmarks,
            comparator: BenchmarkComparator::new(rank_scale),
            inputs: BTreeMap::new(),
            insights: BTreeMap::new(),
            subscriptions: HashMap::new(),
            next_seq: 0,
            updates_tx,
            updates_rx,
            out,
            bus,
            state_center,
            cancel,
            view_revision: 0,
        };
        (worker, rx)
    }

    pub(crate) async fn run(
        mut self,
        mut views: watch::Receiver<Arc<MergedView<OperationalEvent>>>,
        mut policy: watch::Receiver<Arc<EnginePolicy>>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                changed = views.changed() => {
                    if changed.is_err() {
                        debug!(target: "insights", owner = %self.owner, "merged view closed");
                        break;
                    }
                    let view = Arc::clone(&views.borrow_and_update());
                    self.on_view(&view);
                }
                Ok(()) = policy.changed() => {
                    let scale = policy.borrow_and_update().benchmark.rank_scale;
                    self.on_rank_scale(scale);
                }
                Some(update) = self.updates_rx.recv() => self.on_benchmark(update),
            }
        }
        self.close_all_benchmarks();
        debug!(target: "insights", owner = %self.owner, "insights worker stopped");
    }

    fn on_view(&mut self, view: &MergedView<OperationalEvent>) {
        self.view_revision = view.revision;
        let next = collect_inputs(view);

        let changed: Vec<GroupId> = next
            .iter()
            .filter(|(id, input)| self.inputs.get(*id) != Some(*input))
            .map(|(id, _)| id.clone())
            .collect();
        let removed: Vec<GroupId> = self
            .inputs
            .keys()
            .filter(|id| !next.contains_key(*id))
            .cloned()
            .collect();
        self.inputs = next;
        self.reconcile_benchmarks();

        if changed.is_empty() && removed.is_empty() {
            trace!(target: "insights", revision = view.revision, "view carried no group changes");
            return;
        }
        for id in &removed {
            self.insights.remove(id);
        }
        for id in &changed {
            self.recompute(id);
        }
        metrics::record_recomputed(changed.len());
        self.publish();
    }

    fn on_rank_scale(&mut self, scale: RankScale) {
        if scale == self.comparator.scale() {
            return;
        }
        info!(target: "insights", owner = %self.owner, ?scale, "rank scale changed, re-ranking all groups");
        self.comparator = BenchmarkComparator::new(scale);
        let all: Vec<GroupId> = self.inputs.keys().cloned().collect();
        for id in &all {
            self.recompute(id);
        }
        metrics::record_recomputed(all.len());
        self.publish();
    }

    fn on_benchmark(&mut self, update: BenchmarkUpdate) {
        let Some(subscription) = self.subscriptions.get_mut(&update.key) else {
            trace!(target: "insights", key = %update.key, "benchmark update for a closed key");
            return;
        };
        if subscription.seq != update.seq || subscription.latest == update.set {
            return;
        }
        subscription.latest = update.set;
        debug!(target: "insights", key = %update.key, present = subscription.latest.is_some(), "benchmark set replaced");

        let affected: Vec<GroupId> = self
            .inputs
            .iter()
            .filter(|(_, input)| input.key.as_ref() == Some(&update.key))
            .map(|(id, _)| id.clone())
            .collect();
        if affected.is_empty() {
            return;
        }
        for id in &affected {
            self.recompute(id);
        }
        metrics::record_recomputed(affected.len());
        self.publish();
    }

    /// Opens a subscription per distinct benchmark key in use, closes the rest.
    fn reconcile_benchmarks(&mut self) {
        let desired: BTreeSet<BenchmarkKey> = self
            .inputs
            .values()
            .filter_map(|input| input.key.clone())
            .collect();
        let stale: Vec<BenchmarkKey> = self
            .subscriptions
            .keys()
            .filter(|key| !desired.contains(*key))
            .cloned()
            .collect();
        for key in &stale {
            if let Some(subscription) = self.subscriptions.remove(key) {
                subscription.token.cancel();
                debug!(target: "insights", key = %key, "benchmark subscription closed");
            }
        }
        metrics::benchmarks_closed(stale.len());
        for key in desired {
            if !self.subscriptions.contains_key(&key) {
                self.open_benchmark(key);
            }
        }
    }

    fn open_benchmark(&mut self, key: BenchmarkKey) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let token = self.cancel.child_token();
        let mut stream = self.benchmarks.subscribe(&key);
        let tx = self.updates_tx.clone();
        let task_token = token.clone();
        let task_key = key.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    next = stream.next() => {
                        let Some(set) = next else { break };
                        let update = BenchmarkUpdate { key: task_key.clone(), seq, set };
                        if tx.send(update).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        metrics::benchmark_opened();
        debug!(target: "insights", key = %key, seq, "benchmark subscription opened");
        self.subscriptions.insert(
            key,
            BenchmarkSubscription {
                seq,
                token,
                latest: None,
            },
        );
    }

    fn close_all_benchmarks(&mut self) {
        let count = self.subscriptions.len();
        for (_, subscription) in self.subscriptions.drain() {
            subscription.token.cancel();
        }
        metrics::benchmarks_closed(count);
    }

    fn recompute(&mut self, id: &GroupId) {
        let Some(input) = self.inputs.get(id) else {
            return;
        };
        let benchmark = input
            .key
            .as_ref()
            .and_then(|key| self.subscriptions.get(key))
            .and_then(|subscription| subscription.latest.as_ref());

        let performance = match calculate_checked(&input.totals) {
            Ok(values) => GroupPerformance::Ready {
                totals: input.totals,
                metrics: self.comparator.rank_values(&values, benchmark),
            },
            Err(err) => {
                trace!(target: "insights", group = %id, %err, "metrics withheld");
                GroupPerformance::InsufficientData
            }
        };
        let insight = GroupInsight {
            group_id: id.clone(),
            farm_id: input.farm_id.clone(),
            name: input.name.clone(),
            benchmark_key: input.key.clone(),
            benchmarked: benchmark.is_some(),
            performance,
        };

        let was_insufficient = matches!(
            self.insights.get(id).map(|previous| &previous.performance),
            Some(GroupPerformance::InsufficientData)
        );
        if insight.performance == GroupPerformance::InsufficientData && !was_insufficient {
            self.report_insufficient(&insight);
        }
        self.insights.insert(id.clone(), insight);
    }

    fn report_insufficient(&self, insight: &GroupInsight) {
        let scope = ScopeKey::group(
            self.owner.clone(),
            insight.farm_id.clone(),
            insight.group_id.clone(),
        );
        let error = FlockError::InsufficientData {
            group: insight.group_id.to_string(),
        };
        let Some(signal) = FaultSignal::from_error(Some(scope), &error) else {
            return;
        };
        warn!(target: "insights", group = %insight.group_id, "no ewes mated, metrics withheld");
        self.bus.emit(signal.clone());
        self.state_center.record(StateEvent::fault(signal));
    }

    fn publish(&mut self) {
        let revision = self.out.borrow().revision + 1;
        let snapshot = InsightsSnapshot {
            revision,
            view_revision: self.view_revision,
            rank_scale: self.comparator.scale(),
            groups: self.insights.clone(),
        };
        self.out.send_replace(Arc::new(snapshot));
        metrics::record_published();
        info!(
            target: "insights",
            owner = %self.owner,
            revision,
            groups = self.insights.len(),
            "insights published"
        );
    }
}

/// Per-group inputs of a view: totals over the group's events and its benchmark key.
/// Events of groups absent from the view are ignored.
fn collect_inputs(view: &MergedView<OperationalEvent>) -> BTreeMap<GroupId, GroupInput> {
    let farms: HashMap<&FarmId, &Farm> = view.farms.iter().map(|farm| (&farm.id, farm)).collect();
    let mut buckets = partition_by_group(view.events.iter());

    view.groups
        .iter()
        .map(|group| {
            let region = farms
                .get(&group.farm_id)
                .and_then(|farm| farm.region.clone());
            let key = match (&group.breed, region) {
                (Some(breed), Some(region)) => {
                    Some(BenchmarkKey::new(breed.clone(), region, group.season_year()))
                }
                _ => None,
            };
            let totals = buckets
                .remove(&group.id)
                .map(|events| events.totals())
                .unwrap_or_default();
            let input = GroupInput {
                farm_id: group.farm_id.clone(),
                name: group.name.clone(),
                key,
                totals,
            };
            (group.id.clone(), input)
        })
        .collect()
}
