use std::sync::Arc;

use chrono::{DateTime, Utc};
use flockview_core_types::{
    Farm, FaultSignal, Group, GroupScoped, MergePoint, ScopeKey, ScopeLevel, ScopedEntity,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::signature::{signature_of, Signature};
use crate::store::CancelHandle;

/// Event type a session can track at group level.
pub trait ViewEvent: ScopedEntity + GroupScoped + DeserializeOwned + std::fmt::Debug {}

impl<T> ViewEvent for T where T: ScopedEntity + GroupScoped + DeserializeOwned + std::fmt::Debug {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Decoded contents of one scope, or a flattened union of many.
#[derive(Clone, Debug, PartialEq)]
pub enum Collection<E> {
    Farms(Vec<Farm>),
    Groups(Vec<Group>),
    Events(Vec<E>),
}

impl<E: ScopedEntity> Collection<E> {
    pub fn merge_point(&self) -> MergePoint {
        match self {
            Collection::Farms(_) => MergePoint::Farms,
            Collection::Groups(_) => MergePoint::Groups,
            Collection::Events(_) => MergePoint::Events,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Collection::Farms(items) => items.len(),
            Collection::Groups(items) => items.len(),
            Collection::Events(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signature(&self, strict: bool) -> Signature {
        match self {
            Collection::Farms(items) => signature_of(items, strict),
            Collection::Groups(items) => signature_of(items, strict),
            Collection::Events(items) => signature_of(items, strict),
        }
    }
}

pub struct SubscriptionNode<E> {
    pub scope: ScopeKey,
    pub level: ScopeLevel,
    /// Identifies this incarnation of the scope; callbacks carrying another seq are stale.
    pub seq: u64,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub token: CancellationToken,
    pub last_snapshot: Option<Collection<E>>,
    /// Signature of `last_snapshot`, not yet part of a completed publish.
    pub pending_signature: Option<String>,
    /// Signature committed by the last completed debounce cycle.
    pub last_signature: Option<String>,
    pub last_error: Option<FaultSignal>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub(crate) cancel: Option<CancelHandle>,
}

impl<E> SubscriptionNode<E> {
    pub(crate) fn new(
        scope: ScopeKey,
        seq: u64,
        parent: Option<NodeId>,
        token: CancellationToken,
    ) -> Self {
        Self {
            level: scope.level(),
            scope,
            seq,
            parent,
            children: Vec::new(),
            token,
            last_snapshot: None,
            pending_signature: None,
            last_signature: None,
            last_error: None,
            opened_at: Utc::now(),
            updated_at: None,
            cancel: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }
}

/// Published, flattened view across every live subscription of one owner.
#[derive(Debug)]
pub struct MergedView<E> {
    pub farms: Arc<Vec<Farm>>,
    pub groups: Arc<Vec<Group>>,
    pub events: Arc<Vec<E>>,
    pub revision: u64,
    pub last_merge: Option<MergePoint>,
    pub published_at: Option<DateTime<Utc>>,
}

impl<E> Clone for MergedView<E> {
    fn clone(&self) -> Self {
        Self {
            farms: Arc::clone(&self.farms),
            groups: Arc::clone(&self.groups),
            events: Arc::clone(&self.events),
            revision: self.revision,
            last_merge: self.last_merge,
            published_at: self.published_at,
        }
    }
}

impl<E> Default for MergedView<E> {
    fn default() -> Self {
        Self {
            farms: Arc::new(Vec::new()),
            groups: Arc::new(Vec::new()),
            events: Arc::new(Vec::new()),
            revision: 0,
            last_merge: None,
            published_at: None,
        }
    }
}

impl<E> MergedView<E> {
    /// Copy of `self` with one collection replaced and the revision bumped.
    pub(crate) fn with(&self, collection: Collection<E>) -> Self {
        let mut next = self.clone();
        next.last_merge = Some(match collection {
            Collection::Farms(items) => {
                next.farms = Arc::new(items);
                MergePoint::Farms
            }
            Collection::Groups(items) => {
                next.groups = Arc::new(items);
                MergePoint::Groups
            }
            Collection::Events(items) => {
                next.events = Arc::new(items);
                MergePoint::Events
            }
        });
        next.revision += 1;
        next.published_at = Some(Utc::now());
        next
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NodeStatus {
    pub scope: ScopeKey,
    pub level: ScopeLevel,
    pub items: Option<usize>,
    pub committed: bool,
    pub last_error: Option<FaultSignal>,
}

/// Point-in-time description of a session's subscription tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TopologySnapshot {
    pub farms: Vec<ScopeKey>,
    pub groups: Vec<ScopeKey>,
    pub nodes: Vec<NodeStatus>,
    pub pending_merges: Vec<MergePoint>,
    pub stats: SessionStats,
}

impl TopologySnapshot {
    pub fn node(&self, scope: &ScopeKey) -> Option<&NodeStatus> {
        self.nodes.iter().find(|node| &node.scope == scope)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub snapshots: u64,
    pub node_unchanged: u64,
    pub published: u64,
    pub suppressed: u64,
    pub faults: u64,
    pub stale_callbacks: u64,
    pub nodes_opened: u64,
    pub nodes_closed: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DetachReport {
    pub cancelled_nodes: usize,
    pub dropped_timers: usize,
    pub stats: SessionStats,
}
