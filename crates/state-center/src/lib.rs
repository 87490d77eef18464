use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use flockview_core_types::{FaultSignal, FlockError, MergePoint, ScopeKey};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_writer_pretty;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyAction {
    SessionAttached,
    SessionDetached,
    NodeAttached,
    NodeDetached,
}

/// Subscription tree change.
#[derive(Clone, Debug, Serialize)]
pub struct TopologyEvent {
    pub action: TopologyAction,
    pub scope: Option<ScopeKey>,
    pub note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TopologyEvent {
    pub fn new(action: TopologyAction, scope: Option<ScopeKey>, note: Option<String>) -> Self {
        Self {
            action,
            scope,
            note,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// A coalesced union differed from the last published one and was swapped in.
    Published,
    /// A coalesced union matched the last published signature.
    Suppressed,
    /// A raw push matched its node's previous snapshot and never reached the coalescer.
    NodeUnchanged,
}

#[derive(Clone, Debug, Serialize)]
pub struct MergeEvent {
    pub merge_point: MergePoint,
    pub outcome: MergeOutcome,
    pub scope: Option<ScopeKey>,
    pub item_count: usize,
    pub revision: Option<u64>,
    pub recorded_at: DateTime<Utc>,
}

impl MergeEvent {
    pub fn published(merge_point: MergePoint, item_count: usize, revision: u64) -> Self {
        Self {
            merge_point,
            outcome: MergeOutcome::Published,
            scope: None,
            item_count,
            revision: Some(revision),
            recorded_at: Utc::now(),
        }
    }

    pub fn suppressed(merge_point: MergePoint, item_count: usize) -> Self {
        Self {
            merge_point,
            outcome: MergeOutcome::Suppressed,
            scope: None,
            item_count,
            revision: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn node_unchanged(merge_point: MergePoint, scope: ScopeKey, item_count: usize) -> Self {
        Self {
            merge_point,
            outcome: MergeOutcome::NodeUnchanged,
            scope: Some(scope),
            item_count,
            revision: None,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateEvent {
    Topology(TopologyEvent),
    Merge(MergeEvent),
    Fault(FaultSignal),
}

impl StateEvent {
    pub fn topology(event: TopologyEvent) -> Self {
        Self::Topology(event)
    }

    pub fn merge(event: MergeEvent) -> Self {
        Self::Merge(event)
    }

    pub fn fault(signal: FaultSignal) -> Self {
        Self::Fault(signal)
    }

    fn scope(&self) -> Option<&ScopeKey> {
        match self {
            StateEvent::Topology(event) => event.scope.as_ref(),
            StateEvent::Merge(event) => event.scope.as_ref(),
            StateEvent::Fault(signal) => signal.scope.as_ref(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct StateCenterStats {
    pub total_events: u64,
    pub topology_events: u64,
    pub merges_published: u64,
    pub merges_suppressed: u64,
    pub node_unchanged: u64,
    pub faults: u64,
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }
}

impl<T: Clone> BoundedRing<T> {
    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[async_trait]
pub trait StateCenter: Send + Sync {
    async fn append(&self, event: StateEvent) -> Result<(), FlockError>;

    /// Non-async variant for callers running inside synchronous callbacks.
    fn record(&self, event: StateEvent);
}

/// In-memory ring buffer storing recent engine events for diagnostics.
pub struct InMemoryStateCenter {
    scope_capacity: usize,
    events: Mutex<BoundedRing<StateEvent>>,
    scope_events: DashMap<ScopeKey, Mutex<BoundedRing<StateEvent>>>,
    stats: Mutex<StateCenterStats>,
}

impl InMemoryStateCenter {
    pub fn new(capacity: usize) -> Self {
        let global_capacity = capacity.max(1);
        let scope_capacity = std::cmp::max(global_capacity / 4, 16);
        Self {
            scope_capacity,
            events: Mutex::new(BoundedRing::new(global_capacity)),
            scope_events: DashMap::new(),
            stats: Mutex::new(StateCenterStats::default()),
        }
    }

    pub fn snapshot(&self) -> Vec<StateEvent> {
        self.events.lock().snapshot()
    }

    pub fn stats(&self) -> StateCenterStats {
        self.stats.lock().clone()
    }

    pub fn recent_scope(&self, scope: &ScopeKey) -> Vec<StateEvent> {
        self.scope_events
            .get(scope)
            .map(|entry| entry.value().lock().snapshot())
            .unwrap_or_default()
    }

    pub fn recent_faults(&self) -> Vec<FaultSignal> {
        self.snapshot()
            .into_iter()
            .filter_map(|event| match event {
                StateEvent::Fault(signal) => Some(signal),
                _ => None,
            })
            .collect()
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let snapshot = StateCenterSnapshot {
            stats: self.stats(),
            events: self.snapshot(),
            scopes: self.scope_counters(),
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }

    /// Per-scope rings live as long as their subscription; the global ring keeps the
    /// detach record itself.
    fn push_scoped(&self, event: &StateEvent) {
        if let StateEvent::Topology(topology) = event {
            match (topology.action, topology.scope.as_ref()) {
                (TopologyAction::NodeDetached, Some(scope)) => {
                    self.scope_events.remove(scope);
                    return;
                }
                (TopologyAction::SessionDetached, Some(scope)) => {
                    self.scope_events.retain(|key, _| key.owner != scope.owner);
                    return;
                }
                _ => {}
            }
        }
        if let Some(scope) = event.scope() {
            let mut entry = self
                .scope_events
                .entry(scope.clone())
                .or_insert_with(|| Mutex::new(BoundedRing::new(self.scope_capacity)));
            entry.value_mut().lock().push(event.clone());
        }
    }

    fn scope_counters(&self) -> Vec<ScopeCount> {
        let mut counts: Vec<ScopeCount> = self
            .scope_events
            .iter()
            .map(|entry| ScopeCount {
                scope: entry.key().to_string(),
                count: entry.value().lock().len(),
            })
            .collect();
        counts.sort_by(|a, b| a.scope.cmp(&b.scope));
        counts
    }

    fn update_stats(&self, event: &StateEvent) {
        let mut stats = self.stats.lock();
        stats.total_events = stats.total_events.saturating_add(1);
        match event {
            StateEvent::Topology(_) => {
                stats.topology_events = stats.topology_events.saturating_add(1)
            }
            StateEvent::Merge(merge) => match merge.outcome {
                MergeOutcome::Published => {
                    stats.merges_published = stats.merges_published.saturating_add(1)
                }
                MergeOutcome::Suppressed => {
                    stats.merges_suppressed = stats.merges_suppressed.saturating_add(1)
                }
                MergeOutcome::NodeUnchanged => {
                    stats.node_unchanged = stats.node_unchanged.saturating_add(1)
                }
            },
            StateEvent::Fault(_) => stats.faults = stats.faults.saturating_add(1),
        }
    }
}

#[async_trait]
impl StateCenter for InMemoryStateCenter {
    async fn append(&self, event: StateEvent) -> Result<(), FlockError> {
        self.record(event);
        Ok(())
    }

    fn record(&self, event: StateEvent) {
        {
            let mut guard = self.events.lock();
            guard.push(event.clone());
        }
        self.push_scoped(&event);
        self.update_stats(&event);
    }
}

/// No-op state center for tests and benchmarks.
pub struct NoopStateCenter;

impl NoopStateCenter {
    pub fn new() -> Arc<dyn StateCenter> {
        Arc::new(Self)
    }
}

#[async_trait]
impl StateCenter for NoopStateCenter {
    async fn append(&self, _event: StateEvent) -> Result<(), FlockError> {
        Ok(())
    }

    fn record(&self, _event: StateEvent) {}
}

#[derive(Serialize)]
struct StateCenterSnapshot {
    stats: StateCenterStats,
    events: Vec<StateEvent>,
    scopes: Vec<ScopeCount>,
}

#[derive(Serialize)]
struct ScopeCount {
    scope: String,
    count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    use flockview_core_types::{FarmId, FaultKind, GroupId, OwnerId};
    use tempfile::NamedTempFile;

    fn farm_scope() -> ScopeKey {
        ScopeKey::farm(OwnerId::from("owner-1"), FarmId::from("farm-1"))
    }

    #[tokio::test]
    async fn in_memory_center_bounded() {
        let center = InMemoryStateCenter::new(2);
        let scope = farm_scope();

        center
            .append(StateEvent::topology(TopologyEvent::new(
                TopologyAction::NodeAttached,
                Some(scope.clone()),
                None,
            )))
            .await
            .unwrap();
        center
            .append(StateEvent::merge(MergeEvent::node_unchanged(
                MergePoint::Groups,
                scope.clone(),
                3,
            )))
            .await
            .unwrap();
        center
            .append(StateEvent::merge(MergeEvent::published(MergePoint::Groups, 3, 1)))
            .await
            .unwrap();
        center
            .append(StateEvent::merge(MergeEvent::suppressed(MergePoint::Groups, 3)))
            .await
            .unwrap();

        let events = center.snapshot();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            StateEvent::Merge(MergeEvent {
                outcome: MergeOutcome::Suppressed,
                ..
            })
        ));

        let stats = center.stats();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.topology_events, 1);
        assert_eq!(stats.node_unchanged, 1);
        assert_eq!(stats.merges_published, 1);
        assert_eq!(stats.merges_suppressed, 1);

        // scoped rings keep the events the global ring already evicted
        assert_eq!(center.recent_scope(&scope).len(), 2);

        let file = NamedTempFile::new().expect("tempfile");
        center
            .write_snapshot(file.path())
            .expect("write snapshot to disk");
        let written = std::fs::read_to_string(file.path()).expect("read snapshot");
        assert!(written.contains("\"total_events\""));
        assert!(written.contains("suppressed"));
        assert!(written.contains("\"scopes\""));
    }

    #[test]
    fn faults_recorded_synchronously() {
        let center = InMemoryStateCenter::new(8);
        let scope = farm_scope();
        center.record(StateEvent::fault(FaultSignal::new(
            FaultKind::Transport,
            Some(scope.clone()),
            "permission denied",
        )));

        let faults = center.recent_faults();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].kind, FaultKind::Transport);
        assert_eq!(center.stats().faults, 1);
        assert_eq!(center.recent_scope(&scope).len(), 1);
    }

    #[test]
    fn detached_scopes_release_their_rings() {
        let center = InMemoryStateCenter::new(64);
        let farm = farm_scope();
        let group = farm.child_group(GroupId::from("group-1")).unwrap();
        let other_owner = ScopeKey::owner(OwnerId::from("owner-2"));
        for scope in [&farm, &group, &other_owner] {
            center.record(StateEvent::topology(TopologyEvent::new(
                TopologyAction::NodeAttached,
                Some(scope.clone()),
                None,
            )));
        }

        center.record(StateEvent::topology(TopologyEvent::new(
            TopologyAction::NodeDetached,
            Some(group.clone()),
            None,
        )));
        assert!(center.recent_scope(&group).is_empty());
        assert_eq!(center.recent_scope(&farm).len(), 1);

        center.record(StateEvent::topology(TopologyEvent::new(
            TopologyAction::SessionDetached,
            Some(ScopeKey::owner(OwnerId::from("owner-1"))),
            None,
        )));
        assert!(center.recent_scope(&farm).is_empty());
        assert_eq!(center.recent_scope(&other_owner).len(), 1);
        assert_eq!(center.scope_counters().len(), 1);
        assert_eq!(center.stats().topology_events, 5);
        assert_eq!(center.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn noop_center_accepts_everything() {
        let center = NoopStateCenter::new();
        center
            .append(StateEvent::merge(MergeEvent::suppressed(MergePoint::Farms, 0)))
            .await
            .unwrap();
        center.record(StateEvent::topology(TopologyEvent::new(
            TopologyAction::SessionDetached,
            None,
            None,
        )));
    }
}
