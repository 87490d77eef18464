//! Per-owner subscription session.
//!
//! A session owns the subscription tree for one owner and is its only writer. Store
//! callbacks, debounce timers and queries all reach the tree through one command
//! channel drained by a single actor task, so no lock guards the tree itself.
//!
//! Cancellation is structured: the session holds a root token, each farm node a child
//! of it and each group node a child of its farm. Callbacks check their node token
//! before enqueueing anything, and the actor re-checks the node incarnation on receipt.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use flockview_core_types::{
    Document, Farm, FaultKind, FaultSignal, FlockError, Group, MergePoint, OwnerId, ScopeKey,
    ScopeLevel, ScopedEntity,
};
use flockview_event_bus::{EventBus, InMemoryBus};
use flockview_policy_center::EnginePolicy;
use flockview_scheduler::{CoalescerStats, DebounceCoalescer, DebounceConfig, FireFn};
use flockview_state_center::{
    MergeEvent, NoopStateCenter, StateCenter, StateEvent, TopologyAction, TopologyEvent,
};
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::errors::RegistryError;
use crate::metrics;
use crate::model::{
    Collection, DetachReport, MergedView, NodeStatus, SessionStats, TopologySnapshot, ViewEvent,
};
use crate::signature::SignatureCache;
use crate::store::{OnChange, Store};
use crate::tree::SubscriptionTree;

const DEFAULT_BACKLOG_WARN: usize = 1024;
const DEFAULT_BUS_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub debounce: DebounceConfig,
    /// Invariant violations trip a debug assertion when set.
    pub strict_invariants: bool,
    pub backlog_warn: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            strict_invariants: cfg!(debug_assertions),
            backlog_warn: DEFAULT_BACKLOG_WARN,
        }
    }
}

impl SessionConfig {
    pub fn from_policy(policy: &EnginePolicy) -> Self {
        Self {
            debounce: policy.sync.debounce_config(),
            strict_invariants: policy.invariants.strict,
            backlog_warn: policy.sync.backlog_warn,
        }
    }
}

/// Collaborators handed to a session at attach time.
pub struct SessionDeps {
    pub store: Arc<dyn Store>,
    pub bus: Arc<InMemoryBus<FaultSignal>>,
    pub state_center: Arc<dyn StateCenter>,
    pub policy_updates: Option<watch::Receiver<Arc<EnginePolicy>>>,
}

impl SessionDeps {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            bus: InMemoryBus::new(DEFAULT_BUS_CAPACITY),
            state_center: NoopStateCenter::new(),
            policy_updates: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<InMemoryBus<FaultSignal>>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_state_center(mut self, state_center: Arc<dyn StateCenter>) -> Self {
        self.state_center = state_center;
        self
    }

    /// Live policy feed; quiet window, strictness and backlog threshold follow it.
    pub fn with_policy_updates(mut self, updates: watch::Receiver<Arc<EnginePolicy>>) -> Self {
        self.policy_updates = Some(updates);
        self
    }
}

enum Command<E> {
    Snapshot {
        scope: ScopeKey,
        seq: u64,
        result: Result<Vec<Document>, FlockError>,
    },
    Merge {
        merge_point: MergePoint,
        payload: Collection<E>,
    },
    Topology {
        reply: oneshot::Sender<TopologySnapshot>,
    },
    Detach {
        reply: oneshot::Sender<DetachReport>,
    },
}

struct CommandSender<E> {
    tx: mpsc::UnboundedSender<Command<E>>,
    depth: Arc<AtomicUsize>,
    backlog_warn: Arc<AtomicUsize>,
}

impl<E> Clone for CommandSender<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
            backlog_warn: Arc::clone(&self.backlog_warn),
        }
    }
}

impl<E> CommandSender<E> {
    /// Returns false once the actor is gone.
    fn send(&self, command: Command<E>) -> bool {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(command).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        if depth == self.backlog_warn.load(Ordering::Relaxed) {
            warn!(target: "registry", depth, "session command backlog is building up");
        }
        true
    }

    fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Handle to a running session. Dropping it without [`OwnerSession::detach`] still
/// cancels every subscription and stops the actor.
pub struct OwnerSession<E: ViewEvent> {
    owner: OwnerId,
    sender: CommandSender<E>,
    view: watch::Receiver<Arc<MergedView<E>>>,
    bus: Arc<InMemoryBus<FaultSignal>>,
    root: CancellationToken,
    coalescer: DebounceCoalescer<MergePoint, Collection<E>>,
    task: Option<JoinHandle<()>>,
}

impl<E: ViewEvent> OwnerSession<E> {
    /// Opens the owner subscription and starts the actor. Must run inside a tokio runtime.
    pub fn attach(owner: OwnerId, deps: SessionDeps, config: SessionConfig) -> Self {
        let SessionDeps {
            store,
            bus,
            state_center,
            policy_updates,
        } = deps;

        let (tx, rx) = mpsc::unbounded_channel();
        let sender = CommandSender {
            tx,
            depth: Arc::new(AtomicUsize::new(0)),
            backlog_warn: Arc::new(AtomicUsize::new(config.backlog_warn.max(1))),
        };
        let root = CancellationToken::new();

        let fire_sender = sender.clone();
        let fire: FireFn<MergePoint, Collection<E>> = Arc::new(move |merge_point, payload| {
            fire_sender.send(Command::Merge {
                merge_point,
                payload,
            });
        });
        let coalescer = DebounceCoalescer::new(&config.debounce, fire);
        let (view_tx, view_rx) = watch::channel(Arc::new(MergedView::default()));

        let mut actor = SessionActor {
            owner: owner.clone(),
            tree: SubscriptionTree::new(),
            signatures: SignatureCache::new(config.strict_invariants),
            coalescer: coalescer.clone(),
            store,
            sender: sender.clone(),
            view_tx,
            root: root.clone(),
            bus: Arc::clone(&bus),
            state_center,
            strict: config.strict_invariants,
            stats: SessionStats::default(),
        };
        actor.state_center.record(StateEvent::topology(TopologyEvent::new(
            TopologyAction::SessionAttached,
            Some(ScopeKey::owner(owner.clone())),
            None,
        )));
        actor.open_node(ScopeKey::owner(owner.clone()));
        info!(target: "registry", owner = %owner, "session attached");

        let task = tokio::spawn(actor.run(rx, policy_updates));

        Self {
            owner,
            sender,
            view: view_rx,
            bus,
            root,
            coalescer,
            task: Some(task),
        }
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Receiver of every published view; the initial value is the empty revision 0.
    pub fn view(&self) -> watch::Receiver<Arc<MergedView<E>>> {
        self.view.clone()
    }

    pub fn current(&self) -> Arc<MergedView<E>> {
        Arc::clone(&self.view.borrow())
    }

    pub fn faults(&self) -> broadcast::Receiver<FaultSignal> {
        self.bus.subscribe()
    }

    pub fn is_attached(&self) -> bool {
        !self.root.is_cancelled()
    }

    pub fn coalescer_stats(&self) -> CoalescerStats {
        self.coalescer.stats()
    }

    /// Commands queued but not yet taken by the actor.
    pub fn backlog(&self) -> usize {
        self.sender.depth()
    }

    pub async fn topology(&self) -> Result<TopologySnapshot, RegistryError> {
        let (reply, rx) = oneshot::channel();
        if !self.sender.send(Command::Topology { reply }) {
            return Err(RegistryError::SessionClosed);
        }
        rx.await.map_err(|_| RegistryError::SessionClosed)
    }

    /// Waits until the actor has drained every queued command, including the snapshot
    /// callbacks of nodes opened while draining. Pending debounce timers are not awaited.
    pub async fn settle(&self) -> Result<TopologySnapshot, RegistryError> {
        loop {
            let snapshot = self.topology().await?;
            if self.sender.depth() == 0 {
                return Ok(snapshot);
            }
        }
    }

    /// Tears the session down: every store handle is invoked once, pending merges are
    /// dropped and one final empty view is published.
    pub async fn detach(mut self) -> Result<DetachReport, RegistryError> {
        let (reply, rx) = oneshot::channel();
        let sent = self.sender.send(Command::Detach { reply });
        let task = self.task.take();
        if !sent {
            self.root.cancel();
            self.coalescer.cancel_all();
            return Err(RegistryError::SessionClosed);
        }
        let report = rx.await.map_err(|_| RegistryError::SessionClosed)?;
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(target: "registry", owner = %self.owner, ?err, "session task ended abnormally");
            }
        }
        Ok(report)
    }
}

impl<E: ViewEvent> Drop for OwnerSession<E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.root.cancel();
            self.coalescer.cancel_all();
            task.abort();
            debug!(target: "registry", owner = %self.owner, "session dropped without detach");
        }
    }
}

struct SessionActor<E: ViewEvent> {
    owner: OwnerId,
    tree: SubscriptionTree<E>,
    signatures: SignatureCache,
    coalescer: DebounceCoalescer<MergePoint, Collection<E>>,
    store: Arc<dyn Store>,
    sender: CommandSender<E>,
    view_tx: watch::Sender<Arc<MergedView<E>>>,
    root: CancellationToken,
    bus: Arc<InMemoryBus<FaultSignal>>,
    state_center: Arc<dyn StateCenter>,
    strict: bool,
    stats: SessionStats,
}

async fn next_policy(
    updates: &mut Option<watch::Receiver<Arc<EnginePolicy>>>,
) -> Option<Arc<EnginePolicy>> {
    let receiver = updates.as_mut()?;
    if receiver.changed().await.is_ok() {
        return Some(Arc::clone(&receiver.borrow_and_update()));
    }
    *updates = None;
    None
}

impl<E: ViewEvent> SessionActor<E> {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Command<E>>,
        mut policy_updates: Option<watch::Receiver<Arc<EnginePolicy>>>,
    ) {
        loop {
            tokio::select! {
                command = rx.recv() => {
                    let Some(command) = command else {
                        self.teardown();
                        break;
                    };
                    self.sender.depth.fetch_sub(1, Ordering::Relaxed);
                    if !self.handle(command) {
                        break;
                    }
                }
                Some(policy) = next_policy(&mut policy_updates) => self.apply_policy(&policy),
            }
        }
        debug!(target: "registry", owner = %self.owner, "session actor stopped");
    }

    /// Returns false once the session has been torn down.
    fn handle(&mut self, command: Command<E>) -> bool {
        match command {
            Command::Snapshot { scope, seq, result } => self.on_snapshot(scope, seq, result),
            Command::Merge {
                merge_point,
                payload,
            } => self.on_merge(merge_point, payload),
            Command::Topology { reply } => {
                let _ = reply.send(self.topology());
            }
            Command::Detach { reply } => {
                let report = self.teardown();
                let _ = reply.send(report);
                return false;
            }
        }
        true
    }

    fn apply_policy(&mut self, policy: &EnginePolicy) {
        let debounce = policy.sync.debounce_config();
        match debounce.validate() {
            Ok(()) => self.coalescer.set_quiet_window(&debounce),
            Err(err) => warn!(target: "registry", %err, "ignoring invalid quiet window"),
        }
        self.strict = policy.invariants.strict;
        self.signatures.set_strict(self.strict);
        self.sender
            .backlog_warn
            .store(policy.sync.backlog_warn.max(1), Ordering::Relaxed);
        debug!(
            target: "registry",
            owner = %self.owner,
            rev = policy.rev,
            quiet_window_ms = policy.sync.quiet_window_ms,
            "session policy refreshed"
        );
    }

    fn open_node(&mut self, scope: ScopeKey) {
        let parent_token = scope
            .parent()
            .and_then(|parent| self.tree.get(&parent).map(|node| node.token.clone()))
            .unwrap_or_else(|| self.root.clone());
        let token = parent_token.child_token();

        let (id, seq) = match self.tree.insert(scope.clone(), token.clone()) {
            Ok(inserted) => inserted,
            Err(err) => {
                let error = err.into_flock_error("node not opened");
                self.invariant(Some(&scope), &error);
                return;
            }
        };

        let sender = self.sender.clone();
        let callback_scope = scope.clone();
        let on_change: OnChange = Box::new(move |result| {
            if token.is_cancelled() {
                return;
            }
            sender.send(Command::Snapshot {
                scope: callback_scope.clone(),
                seq,
                result,
            });
        });
        let handle = self.store.subscribe(&scope, on_change);
        self.tree.arm(id, handle);

        self.stats.nodes_opened += 1;
        match scope.level() {
            ScopeLevel::Farm => metrics::farm_opened(),
            ScopeLevel::Group => metrics::group_opened(),
            ScopeLevel::Owner => {}
        }
        self.state_center.record(StateEvent::topology(TopologyEvent::new(
            TopologyAction::NodeAttached,
            Some(scope.clone()),
            None,
        )));
        debug!(target: "registry", scope = %scope, seq, "subscription node opened");
    }

    fn close_node(&mut self, scope: &ScopeKey, affected: &mut BTreeSet<MergePoint>) {
        let removed = self.tree.remove_recursive(scope);
        for node in removed {
            self.stats.nodes_closed += 1;
            match node.level {
                ScopeLevel::Farm => metrics::farms_closed(1),
                ScopeLevel::Group => metrics::groups_closed(1),
                ScopeLevel::Owner => {}
            }
            if node.had_snapshot {
                affected.insert(MergePoint::for_level(node.level));
            }
            self.state_center.record(StateEvent::topology(TopologyEvent::new(
                TopologyAction::NodeDetached,
                Some(node.scope),
                None,
            )));
        }
    }

    fn on_snapshot(
        &mut self,
        scope: ScopeKey,
        seq: u64,
        result: Result<Vec<Document>, FlockError>,
    ) {
        let live = self
            .tree
            .get(&scope)
            .map(|node| node.seq == seq && !node.token.is_cancelled())
            .unwrap_or(false);
        if !live {
            self.stats.stale_callbacks += 1;
            trace!(target: "registry", scope = %scope, seq, "stale snapshot dropped");
            return;
        }
        self.stats.snapshots += 1;

        let documents = match result {
            Ok(documents) => documents,
            Err(err) => {
                // the node keeps its last good snapshot
                self.record_fault(Some(&scope), &err);
                return;
            }
        };

        let (collection, rejected) = self.decode(&scope, documents);
        if rejected == 0 {
            if let Some(node) = self.tree.get_mut(&scope) {
                node.last_error = None;
            }
        }
        self.apply_snapshot(&scope, collection);
    }

    fn decode(&mut self, scope: &ScopeKey, documents: Vec<Document>) -> (Collection<E>, usize) {
        match scope.level() {
            ScopeLevel::Owner => {
                let (items, rejected) = self.decode_items(scope, documents, |farm: &Farm| {
                    if farm.owner_id == scope.owner {
                        Ok(())
                    } else {
                        Err(format!("farm belongs to owner {}", farm.owner_id))
                    }
                });
                (Collection::Farms(items), rejected)
            }
            ScopeLevel::Farm => {
                let (items, rejected) = self.decode_items(scope, documents, |group: &Group| {
                    if scope.farm.as_ref() == Some(&group.farm_id) {
                        Ok(())
                    } else {
                        Err(format!("group belongs to farm {}", group.farm_id))
                    }
                });
                (Collection::Groups(items), rejected)
            }
            ScopeLevel::Group => {
                let (items, rejected) = self.decode_items(scope, documents, |event: &E| {
                    if scope.group.as_ref() == Some(event.group_id()) {
                        Ok(())
                    } else {
                        Err(format!("event belongs to group {}", event.group_id()))
                    }
                });
                (Collection::Events(items), rejected)
            }
        }
    }

    /// Decodes each document independently; one bad record never hides the others.
    fn decode_items<T, F>(
        &mut self,
        scope: &ScopeKey,
        documents: Vec<Document>,
        belongs: F,
    ) -> (Vec<T>, usize)
    where
        T: ScopedEntity + DeserializeOwned,
        F: Fn(&T) -> Result<(), String>,
    {
        let mut items = Vec::with_capacity(documents.len());
        let mut rejected = 0;
        for (index, document) in documents.into_iter().enumerate() {
            let item = match serde_json::from_value::<T>(document) {
                Ok(item) => item,
                Err(err) => {
                    rejected += 1;
                    let error = FlockError::decode(scope, format!("document {index}: {err}"));
                    self.record_fault(Some(scope), &error);
                    continue;
                }
            };
            if item.entity_id().is_empty() {
                rejected += 1;
                let error = FlockError::invariant(format!(
                    "document {index} in {scope} has an empty id"
                ));
                self.invariant(Some(scope), &error);
                continue;
            }
            if let Err(reason) = belongs(&item) {
                rejected += 1;
                let error = FlockError::decode(scope, format!("document {index}: {reason}"));
                self.record_fault(Some(scope), &error);
                continue;
            }
            items.push(item);
        }
        (items, rejected)
    }

    fn apply_snapshot(&mut self, scope: &ScopeKey, collection: Collection<E>) {
        let merge_point = collection.merge_point();
        let items = collection.len();
        let signature = collection.signature(self.strict).value;
        let desired = self.child_scopes_of(scope, &collection);

        let Some(node) = self.tree.get_mut(scope) else {
            return;
        };
        if node.pending_signature.as_deref() == Some(signature.as_str()) {
            self.stats.node_unchanged += 1;
            trace!(target: "registry", scope = %scope, items, "node snapshot unchanged");
            self.state_center
                .record(StateEvent::merge(MergeEvent::node_unchanged(
                    merge_point,
                    scope.clone(),
                    items,
                )));
            return;
        }
        node.pending_signature = Some(signature);
        node.last_snapshot = Some(collection);
        node.updated_at = Some(Utc::now());
        debug!(target: "registry", scope = %scope, items, "node snapshot applied");

        let mut affected = BTreeSet::new();
        affected.insert(merge_point);
        if let Some(desired) = desired {
            let diff = self.tree.diff_children(scope, &desired);
            for removed in &diff.removed {
                self.close_node(removed, &mut affected);
            }
            for added in diff.added {
                self.open_node(added);
            }
        }
        for merge_point in affected {
            self.schedule(merge_point);
        }
    }

    fn child_scopes_of(&self, scope: &ScopeKey, collection: &Collection<E>) -> Option<Vec<ScopeKey>> {
        match collection {
            Collection::Farms(farms) => Some(
                farms
                    .iter()
                    .map(|farm| ScopeKey::farm(scope.owner.clone(), farm.id.clone()))
                    .collect(),
            ),
            Collection::Groups(groups) => Some(
                groups
                    .iter()
                    .filter_map(|group| scope.child_group(group.id.clone()))
                    .collect(),
            ),
            Collection::Events(_) => None,
        }
    }

    fn schedule(&mut self, merge_point: MergePoint) {
        let union = self.tree.union_for(merge_point.level());
        trace!(target: "registry", merge_point = %merge_point, items = union.len(), "merge scheduled");
        self.coalescer.push(merge_point, union);
    }

    /// Timers of a torn-down session are dropped by `cancel_all`; a fire that raced the
    /// teardown still finds the root token cancelled.
    fn on_merge(&mut self, merge_point: MergePoint, payload: Collection<E>) {
        if self.root.is_cancelled() {
            self.stats.stale_callbacks += 1;
            trace!(target: "registry", merge_point = %merge_point, "merge after teardown dropped");
            return;
        }

        let items = payload.len();
        let signature = payload.signature(self.strict).value;
        let changed = self.signatures.has_changed(merge_point, &signature);
        self.commit_signatures(merge_point);

        if !changed {
            self.stats.suppressed += 1;
            metrics::record_suppressed(merge_point);
            self.state_center
                .record(StateEvent::merge(MergeEvent::suppressed(merge_point, items)));
            debug!(target: "registry", merge_point = %merge_point, items, "merge suppressed, signature unchanged");
            return;
        }

        let current = Arc::clone(&self.view_tx.borrow());
        let next = Arc::new(current.with(payload));
        let revision = next.revision;
        self.view_tx.send_replace(next);

        self.stats.published += 1;
        metrics::record_republish(merge_point);
        self.state_center.record(StateEvent::merge(MergeEvent::published(
            merge_point,
            items,
            revision,
        )));
        debug!(target: "registry", merge_point = %merge_point, items, revision, "merged view published");
    }

    /// Marks node snapshots at this merge point as part of a completed cycle, unless a
    /// newer push already reopened the window.
    fn commit_signatures(&mut self, merge_point: MergePoint) {
        if self.coalescer.is_pending(&merge_point) {
            return;
        }
        let level = merge_point.level();
        for node in self.tree.nodes_mut().filter(|node| node.level == level) {
            node.last_signature = node.pending_signature.clone();
        }
    }

    fn topology(&self) -> TopologySnapshot {
        let mut nodes: Vec<NodeStatus> = self
            .tree
            .nodes()
            .map(|node| NodeStatus {
                scope: node.scope.clone(),
                level: node.level,
                items: node.last_snapshot.as_ref().map(Collection::len),
                committed: node.last_signature.is_some()
                    && node.last_signature == node.pending_signature,
                last_error: node.last_error.clone(),
            })
            .collect();
        nodes.sort_by(|a, b| a.scope.cmp(&b.scope));

        TopologySnapshot {
            farms: self.tree.scopes_at(ScopeLevel::Farm),
            groups: self.tree.scopes_at(ScopeLevel::Group),
            nodes,
            pending_merges: MergePoint::ALL
                .into_iter()
                .filter(|merge_point| self.coalescer.is_pending(merge_point))
                .collect(),
            stats: self.stats,
        }
    }

    fn record_fault(&mut self, scope: Option<&ScopeKey>, error: &FlockError) {
        let Some(signal) = FaultSignal::from_error(scope.cloned(), error) else {
            debug!(target: "registry", %error, "error is not a fault, ignoring");
            return;
        };
        self.stats.faults += 1;
        let scope_label = scope.map(ToString::to_string).unwrap_or_default();
        match signal.kind {
            FaultKind::InvariantViolation => {
                error!(target: "registry", scope = %scope_label, message = %signal.message, "invariant violated")
            }
            kind => {
                warn!(target: "registry", scope = %scope_label, kind = kind.as_str(), message = %signal.message, "scope fault")
            }
        }
        metrics::record_fault(signal.kind);
        if let Some(node) = scope.and_then(|scope| self.tree.get_mut(scope)) {
            node.last_error = Some(signal.clone());
        }
        self.bus.emit(signal.clone());
        self.state_center.record(StateEvent::fault(signal));
    }

    fn invariant(&mut self, scope: Option<&ScopeKey>, error: &FlockError) {
        self.record_fault(scope, error);
        if self.strict {
            debug_assert!(false, "{error}");
        }
    }

    fn teardown(&mut self) -> DetachReport {
        self.root.cancel();
        let dropped_timers = self.coalescer.cancel_all();

        metrics::farms_closed(self.tree.count_at(ScopeLevel::Farm));
        metrics::groups_closed(self.tree.count_at(ScopeLevel::Group));
        let cancelled_nodes = self.tree.clear();
        self.stats.nodes_closed += cancelled_nodes as u64;
        self.signatures.clear();

        let revision = self.view_tx.borrow().revision + 1;
        self.view_tx.send_replace(Arc::new(MergedView {
            revision,
            published_at: Some(Utc::now()),
            ..MergedView::default()
        }));

        self.state_center.record(StateEvent::topology(TopologyEvent::new(
            TopologyAction::SessionDetached,
            Some(ScopeKey::owner(self.owner.clone())),
            Some(format!("{cancelled_nodes} nodes cancelled")),
        )));
        info!(
            target: "registry",
            owner = %self.owner,
            cancelled_nodes,
            dropped_timers,
            "session detached"
        );

        DetachReport {
            cancelled_nodes,
            dropped_timers,
            stats: self.stats,
        }
    }
}
