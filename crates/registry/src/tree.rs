//! Arena of subscription nodes indexed by scope.
//!
//! The tree is a plain data structure: it never talks to the store. The session decides
//! when to open nodes and hands their cancel handles over with [`SubscriptionTree::arm`];
//! removal always cancels children before their parent.

use std::collections::{HashMap, HashSet};

use flockview_core_types::{Farm, Group, ScopeKey, ScopeLevel, ScopedEntity};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::RegistryError;
use crate::model::{Collection, NodeId, SubscriptionNode, ViewEvent};
use crate::store::CancelHandle;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChildDiff {
    pub added: Vec<ScopeKey>,
    pub removed: Vec<ScopeKey>,
}

impl ChildDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// A node that left the tree, with its cancel handle already invoked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovedNode {
    pub scope: ScopeKey,
    pub level: ScopeLevel,
    pub had_snapshot: bool,
}

pub struct SubscriptionTree<E> {
    nodes: Vec<Option<SubscriptionNode<E>>>,
    free: Vec<usize>,
    index: HashMap<ScopeKey, NodeId>,
    next_seq: u64,
}

impl<E> Default for SubscriptionTree<E> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            next_seq: 1,
        }
    }
}

impl<E: ViewEvent> SubscriptionTree<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node for `scope` under its parent scope. Returns the node id and the
    /// subscription seq its callbacks must carry.
    pub fn insert(
        &mut self,
        scope: ScopeKey,
        token: CancellationToken,
    ) -> Result<(NodeId, u64), RegistryError> {
        if self.index.contains_key(&scope) {
            return Err(RegistryError::DuplicateScope(scope));
        }
        let parent = match scope.parent() {
            Some(parent_scope) => Some(
                *self
                    .index
                    .get(&parent_scope)
                    .ok_or_else(|| RegistryError::OrphanScope(scope.clone()))?,
            ),
            None => None,
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        let node = SubscriptionNode::new(scope.clone(), seq, parent, token);
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        };
        if let Some(parent) = parent {
            if let Some(parent_node) = self.node_mut(parent) {
                parent_node.children.push(id);
            }
        }
        self.index.insert(scope, id);
        Ok((id, seq))
    }

    /// Attaches the store cancel handle to a freshly inserted node.
    pub fn arm(&mut self, id: NodeId, handle: CancelHandle) {
        match self.node_mut(id) {
            Some(node) => node.cancel = Some(handle),
            None => handle.cancel(),
        }
    }

    pub fn contains(&self, scope: &ScopeKey) -> bool {
        self.index.contains_key(scope)
    }

    pub fn id_of(&self, scope: &ScopeKey) -> Option<NodeId> {
        self.index.get(scope).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&SubscriptionNode<E>> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SubscriptionNode<E>> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn get(&self, scope: &ScopeKey) -> Option<&SubscriptionNode<E>> {
        self.id_of(scope).and_then(|id| self.node(id))
    }

    pub fn get_mut(&mut self, scope: &ScopeKey) -> Option<&mut SubscriptionNode<E>> {
        let id = self.id_of(scope)?;
        self.node_mut(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SubscriptionNode<E>> {
        self.nodes.iter().filter_map(Option::as_ref)
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut SubscriptionNode<E>> {
        self.nodes.iter_mut().filter_map(Option::as_mut)
    }

    pub fn scopes_at(&self, level: ScopeLevel) -> Vec<ScopeKey> {
        let mut scopes: Vec<ScopeKey> = self
            .nodes()
            .filter(|node| node.level == level)
            .map(|node| node.scope.clone())
            .collect();
        scopes.sort();
        scopes
    }

    pub fn count_at(&self, level: ScopeLevel) -> usize {
        self.nodes().filter(|node| node.level == level).count()
    }

    pub fn child_scopes(&self, parent: &ScopeKey) -> Vec<ScopeKey> {
        let Some(node) = self.get(parent) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|child| self.node(*child))
            .map(|child| child.scope.clone())
            .collect()
    }

    /// Splits `desired` children of `parent` into scopes to open and tracked scopes to
    /// drop. Children present on both sides are left out of the diff entirely.
    pub fn diff_children(&self, parent: &ScopeKey, desired: &[ScopeKey]) -> ChildDiff {
        let tracked: HashSet<ScopeKey> = self.child_scopes(parent).into_iter().collect();
        let wanted: HashSet<&ScopeKey> = desired.iter().collect();

        let mut added = Vec::new();
        let mut seen = HashSet::new();
        for scope in desired {
            if !tracked.contains(scope) && seen.insert(scope) {
                added.push(scope.clone());
            }
        }
        let mut removed: Vec<ScopeKey> = tracked
            .into_iter()
            .filter(|scope| !wanted.contains(scope))
            .collect();
        removed.sort();

        ChildDiff { added, removed }
    }

    /// Removes `scope` and everything below it, deepest first. Each removed node's token
    /// is cancelled and its store handle invoked exactly once.
    pub fn remove_recursive(&mut self, scope: &ScopeKey) -> Vec<RemovedNode> {
        let mut removed = Vec::new();
        if let Some(id) = self.id_of(scope) {
            self.remove_node(id, &mut removed);
            if let Some(parent) = removed
                .last()
                .and_then(|last| last.scope.parent())
                .and_then(|parent| self.id_of(&parent))
            {
                if let Some(parent_node) = self.node_mut(parent) {
                    parent_node.children.retain(|child| *child != id);
                }
            }
        }
        removed
    }

    fn remove_node(&mut self, id: NodeId, removed: &mut Vec<RemovedNode>) {
        let children = match self.node(id) {
            Some(node) => node.children.clone(),
            None => return,
        };
        for child in children {
            self.remove_node(child, removed);
        }

        let Some(mut node) = self.nodes.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        node.token.cancel();
        if let Some(handle) = node.cancel.take() {
            handle.cancel();
        }
        self.index.remove(&node.scope);
        self.free.push(id.0);
        debug!(target: "registry", scope = %node.scope, "subscription node removed");
        removed.push(RemovedNode {
            scope: node.scope,
            level: node.level,
            had_snapshot: node.last_snapshot.is_some(),
        });
    }

    /// Removes every node, children first. Returns how many were cancelled.
    pub fn clear(&mut self) -> usize {
        let roots: Vec<ScopeKey> = self
            .nodes()
            .filter(|node| node.parent.is_none())
            .map(|node| node.scope.clone())
            .collect();
        let mut count = 0;
        for root in roots {
            count += self.remove_recursive(&root).len();
        }
        // anything left was unreachable from a root
        let stragglers: Vec<NodeId> = self.index.values().copied().collect();
        for id in stragglers {
            let mut removed = Vec::new();
            self.remove_node(id, &mut removed);
            count += removed.len();
        }
        count
    }

    pub fn union_farms(&self) -> Vec<Farm> {
        self.union(|snapshot| match snapshot {
            Collection::Farms(items) => Some(items.as_slice()),
            _ => None,
        })
    }

    pub fn union_groups(&self) -> Vec<Group> {
        self.union(|snapshot| match snapshot {
            Collection::Groups(items) => Some(items.as_slice()),
            _ => None,
        })
    }

    pub fn union_events(&self) -> Vec<E> {
        self.union(|snapshot| match snapshot {
            Collection::Events(items) => Some(items.as_slice()),
            _ => None,
        })
    }

    /// Union of one merge point's node snapshots: deduplicated by id, canonical order.
    pub fn union_for(&self, level: ScopeLevel) -> Collection<E> {
        match level {
            ScopeLevel::Owner => Collection::Farms(self.union_farms()),
            ScopeLevel::Farm => Collection::Groups(self.union_groups()),
            ScopeLevel::Group => Collection::Events(self.union_events()),
        }
    }

    fn union<T, F>(&self, extract: F) -> Vec<T>
    where
        T: ScopedEntity,
        F: Fn(&Collection<E>) -> Option<&[T]>,
    {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for node in self.nodes() {
            let Some(slice) = node.last_snapshot.as_ref().and_then(&extract) else {
                continue;
            };
            for item in slice {
                if seen.insert(item.entity_id().to_string()) {
                    items.push(item.clone());
                }
            }
        }
        items.sort_by(|a, b| a.canonical_cmp(b));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flockview_core_types::{FarmId, GroupId, OperationalEvent, OwnerId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn owner() -> OwnerId {
        OwnerId::from("owner")
    }

    fn farm(id: &str) -> ScopeKey {
        ScopeKey::farm(owner(), FarmId::from(id))
    }

    fn group(farm_id: &str, id: &str) -> ScopeKey {
        ScopeKey::group(owner(), FarmId::from(farm_id), GroupId::from(id))
    }

    fn counting_handle(counter: &Arc<AtomicUsize>) -> CancelHandle {
        let counter = Arc::clone(counter);
        CancelHandle::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn populated(cancels: &Arc<AtomicUsize>) -> SubscriptionTree<OperationalEvent> {
        let mut tree = SubscriptionTree::new();
        let root = CancellationToken::new();
        for scope in [
            ScopeKey::owner(owner()),
            farm("f1"),
            farm("f2"),
            group("f1", "g1"),
            group("f1", "g2"),
            group("f2", "g3"),
        ] {
            let (id, _) = tree.insert(scope, root.child_token()).unwrap();
            tree.arm(id, counting_handle(cancels));
        }
        tree
    }

    #[test]
    fn one_node_per_scope() {
        let mut tree = SubscriptionTree::<OperationalEvent>::new();
        tree.insert(ScopeKey::owner(owner()), CancellationToken::new())
            .unwrap();
        let err = tree
            .insert(ScopeKey::owner(owner()), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateScope(_)));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn children_require_a_tracked_parent() {
        let mut tree = SubscriptionTree::<OperationalEvent>::new();
        let err = tree
            .insert(group("f1", "g1"), CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::OrphanScope(_)));
        assert!(tree.is_empty());
    }

    #[test]
    fn removing_a_farm_cancels_its_groups_first() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut tree = populated(&cancels);
        let g1_token = tree.get(&group("f1", "g1")).unwrap().token.clone();

        let removed = tree.remove_recursive(&farm("f1"));
        let scopes: Vec<ScopeKey> = removed.iter().map(|node| node.scope.clone()).collect();
        assert_eq!(scopes.len(), 3);
        assert_eq!(scopes.last(), Some(&farm("f1")));
        assert!(scopes[..2].iter().all(|scope| scope.level() == ScopeLevel::Group));

        assert_eq!(cancels.load(Ordering::SeqCst), 3);
        assert!(g1_token.is_cancelled());
        assert!(!tree.contains(&group("f1", "g2")));
        assert!(tree.contains(&group("f2", "g3")));
        assert_eq!(tree.child_scopes(&ScopeKey::owner(owner())), vec![farm("f2")]);
    }

    #[test]
    fn diff_leaves_common_children_alone() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let tree = populated(&cancels);
        let diff = tree.diff_children(
            &ScopeKey::owner(owner()),
            &[farm("f2"), farm("f3"), farm("f3")],
        );
        assert_eq!(diff.added, vec![farm("f3")]);
        assert_eq!(diff.removed, vec![farm("f1")]);
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clear_cancels_every_handle_once() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut tree = populated(&cancels);
        assert_eq!(tree.clear(), 6);
        assert_eq!(cancels.load(Ordering::SeqCst), 6);
        assert!(tree.is_empty());
        assert_eq!(tree.clear(), 0);
        assert_eq!(cancels.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn slots_are_reused_with_fresh_seq() {
        let cancels = Arc::new(AtomicUsize::new(0));
        let mut tree = populated(&cancels);
        let old_seq = tree.get(&farm("f2")).unwrap().seq;
        tree.remove_recursive(&farm("f2"));
        let (_, new_seq) = tree
            .insert(farm("f2"), CancellationToken::new())
            .unwrap();
        assert!(new_seq > old_seq);
    }
}
