//! Persistence collaborator consumed by the session.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use flockview_core_types::{Document, FlockError, ScopeKey};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::errors::RegistryError;

/// Listener invoked with every snapshot (or failure) of a subscribed scope.
pub type OnChange = Box<dyn Fn(Result<Vec<Document>, FlockError>) + Send + Sync>;

/// Cancels one store subscription.
///
/// `cancel` consumes the handle so it can run at most once. A handle dropped while still
/// armed cancels on drop.
pub struct CancelHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            debug!(target: "registry", "cancel handle dropped while armed");
            cancel();
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Document store scoped by [`ScopeKey`].
///
/// The scope level selects the collection: owner scope lists farms, farm scope lists the
/// farm's groups, group scope lists the group's operational events. Retry policy belongs
/// to implementations; the session never retries.
#[async_trait]
pub trait Store: Send + Sync {
    /// Registers `on_change` for `scope`. Implementations deliver the current snapshot
    /// (possibly empty) and then every subsequent change, in order.
    fn subscribe(&self, scope: &ScopeKey, on_change: OnChange) -> CancelHandle;

    async fn fetch_all(&self, scope: &ScopeKey) -> Result<Vec<Document>, FlockError>;

    /// Stores a new document, returning its id. A missing `id` field is generated.
    async fn create(&self, scope: &ScopeKey, document: Document) -> Result<String, FlockError>;

    async fn update(&self, scope: &ScopeKey, document: Document) -> Result<(), FlockError>;

    async fn delete(&self, scope: &ScopeKey, id: &str) -> Result<(), FlockError>;
}

type Listener = Arc<OnChange>;

#[derive(Default)]
struct StoreInner {
    collections: Mutex<HashMap<ScopeKey, BTreeMap<String, Document>>>,
    listeners: Mutex<HashMap<ScopeKey, Vec<(u64, Listener)>>>,
    next_listener: AtomicU64,
    subscribed: AtomicU64,
    cancelled: AtomicU64,
}

impl StoreInner {
    fn snapshot(&self, scope: &ScopeKey) -> Vec<Document> {
        self.collections
            .lock()
            .get(scope)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn listeners_for(&self, scope: &ScopeKey) -> Vec<Listener> {
        self.listeners
            .lock()
            .get(scope)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    // listeners run outside both locks so they may re-enter the store
    fn notify(&self, scope: &ScopeKey) {
        let snapshot = self.snapshot(scope);
        for listener in self.listeners_for(scope) {
            listener(Ok(snapshot.clone()));
        }
    }

    fn remove_listener(&self, scope: &ScopeKey, id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(scope) {
            let before = entries.len();
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.len() < before {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            if entries.is_empty() {
                listeners.remove(scope);
            }
        }
    }
}

/// In-process store that notifies subscribers synchronously on every write.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole collection at `scope` and notifies its listeners.
    pub fn replace(&self, scope: &ScopeKey, documents: Vec<Document>) {
        {
            let mut collections = self.inner.collections.lock();
            let collection = collections.entry(scope.clone()).or_default();
            collection.clear();
            for (idx, doc) in documents.into_iter().enumerate() {
                let id = document_id(&doc).unwrap_or_else(|| format!("#{idx}"));
                collection.insert(id, doc);
            }
        }
        self.inner.notify(scope);
    }

    /// Delivers `documents` verbatim to listeners of `scope` without storing them.
    pub fn deliver_raw(&self, scope: &ScopeKey, documents: Vec<Document>) {
        for listener in self.inner.listeners_for(scope) {
            listener(Ok(documents.clone()));
        }
    }

    /// Simulates a transport failure on `scope`.
    pub fn fail(&self, scope: &ScopeKey, message: &str) {
        for listener in self.inner.listeners_for(scope) {
            listener(Err(FlockError::transport(scope, message)));
        }
    }

    pub fn listener_count(&self, scope: &ScopeKey) -> usize {
        self.inner
            .listeners
            .lock()
            .get(scope)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn active_listeners(&self) -> usize {
        self.inner.listeners.lock().values().map(Vec::len).sum()
    }

    pub fn subscribe_count(&self) -> u64 {
        self.inner.subscribed.load(Ordering::Relaxed)
    }

    pub fn cancel_count(&self) -> u64 {
        self.inner.cancelled.load(Ordering::Relaxed)
    }
}

fn document_id(document: &Document) -> Option<String> {
    document
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[async_trait]
impl Store for InMemoryStore {
    fn subscribe(&self, scope: &ScopeKey, on_change: OnChange) -> CancelHandle {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(on_change);
        self.inner
            .listeners
            .lock()
            .entry(scope.clone())
            .or_default()
            .push((id, Arc::clone(&listener)));
        self.inner.subscribed.fetch_add(1, Ordering::Relaxed);

        listener(Ok(self.inner.snapshot(scope)));

        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let scope = scope.clone();
        CancelHandle::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_listener(&scope, id);
            }
        })
    }

    async fn fetch_all(&self, scope: &ScopeKey) -> Result<Vec<Document>, FlockError> {
        Ok(self.inner.snapshot(scope))
    }

    async fn create(&self, scope: &ScopeKey, document: Document) -> Result<String, FlockError> {
        let mut document = document;
        let id = match document_id(&document) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                let object = document.as_object_mut().ok_or_else(|| {
                    RegistryError::InvalidDocument("expected a JSON object".into())
                })?;
                object.insert("id".into(), Value::String(id.clone()));
                id
            }
        };
        {
            let mut collections = self.inner.collections.lock();
            let collection = collections.entry(scope.clone()).or_default();
            if collection.contains_key(&id) {
                return Err(RegistryError::InvalidDocument(format!("duplicate id {id}")).into());
            }
            collection.insert(id.clone(), document);
        }
        self.inner.notify(scope);
        Ok(id)
    }

    async fn update(&self, scope: &ScopeKey, document: Document) -> Result<(), FlockError> {
        let id = document_id(&document)
            .ok_or_else(|| RegistryError::InvalidDocument("missing id".into()))?;
        {
            let mut collections = self.inner.collections.lock();
            let slot = collections
                .get_mut(scope)
                .and_then(|collection| collection.get_mut(&id))
                .ok_or_else(|| RegistryError::NotFound(scope.clone()))?;
            *slot = document;
        }
        self.inner.notify(scope);
        Ok(())
    }

    async fn delete(&self, scope: &ScopeKey, id: &str) -> Result<(), FlockError> {
        let removed = self
            .inner
            .collections
            .lock()
            .get_mut(scope)
            .and_then(|collection| collection.remove(id));
        if removed.is_none() {
            return Err(RegistryError::NotFound(scope.clone()).into());
        }
        self.inner.notify(scope);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flockview_core_types::OwnerId;
    use serde_json::json;

    fn recorder() -> (OnChange, Arc<Mutex<Vec<Result<usize, String>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let on_change: OnChange = Box::new(move |result| {
            sink.lock()
                .push(result.map(|docs| docs.len()).map_err(|err| err.to_string()));
        });
        (on_change, seen)
    }

    #[tokio::test]
    async fn subscribers_see_initial_snapshot_and_writes() {
        let store = InMemoryStore::new();
        let scope = ScopeKey::owner(OwnerId::from("o"));
        let (on_change, seen) = recorder();
        let handle = store.subscribe(&scope, on_change);

        let id = store
            .create(&scope, json!({"name": "North"}))
            .await
            .unwrap();
        store
            .update(&scope, json!({"id": id, "name": "North Hill"}))
            .await
            .unwrap();
        store.delete(&scope, &id).await.unwrap();
        store.fail(&scope, "offline");

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen[0], Ok(0));
        assert_eq!(seen[1], Ok(1));
        assert_eq!(seen[2], Ok(1));
        assert_eq!(seen[3], Ok(0));
        assert!(seen[4].as_ref().unwrap_err().contains("offline"));

        handle.cancel();
        assert_eq!(store.listener_count(&scope), 0);
        assert_eq!(store.cancel_count(), 1);
    }

    #[tokio::test]
    async fn dropped_handle_cancels_once() {
        let store = InMemoryStore::new();
        let scope = ScopeKey::owner(OwnerId::from("o"));
        let (on_change, _) = recorder();
        {
            let _handle = store.subscribe(&scope, on_change);
            assert_eq!(store.active_listeners(), 1);
        }
        assert_eq!(store.active_listeners(), 0);
        assert_eq!(store.cancel_count(), 1);
    }

    #[tokio::test]
    async fn update_of_unknown_document_fails() {
        let store = InMemoryStore::new();
        let scope = ScopeKey::owner(OwnerId::from("o"));
        assert!(store
            .update(&scope, json!({"id": "missing"}))
            .await
            .is_err());
        assert!(store.delete(&scope, "missing").await.is_err());
        assert!(store.create(&scope, json!([1, 2])).await.is_err());
    }
}
