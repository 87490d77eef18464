//! Read-only access to externally computed benchmark distributions.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use flockview_core_types::FlockError;
use flockview_performance::{BenchmarkKey, BenchmarkSet};

/// Current benchmark set for one key, then every replacement. `None` means the set does
/// not exist (yet).
pub type BenchmarkStream = BoxStream<'static, Option<BenchmarkSet>>;

#[async_trait]
pub trait BenchmarkStore: Send + Sync {
    /// Looks a set up by its document id, see [`BenchmarkKey::document_id`].
    async fn fetch_by_id(&self, id: &str) -> Result<Option<BenchmarkSet>, FlockError>;

    fn subscribe(&self, key: &BenchmarkKey) -> BenchmarkStream;
}

/// Benchmark store backed by one watch channel per document id.
#[derive(Default)]
pub struct InMemoryBenchmarkStore {
    channels: Mutex<HashMap<String, watch::Sender<Option<BenchmarkSet>>>>,
}

impl InMemoryBenchmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &BenchmarkKey, set: BenchmarkSet) {
        self.publish(key, Some(set));
    }

    pub fn remove(&self, key: &BenchmarkKey) {
        self.publish(key, None);
    }

    /// Live subscriptions on `key`.
    pub fn subscriber_count(&self, key: &BenchmarkKey) -> usize {
        self.channels
            .lock()
            .get(&key.document_id())
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    fn publish(&self, key: &BenchmarkKey, set: Option<BenchmarkSet>) {
        let mut channels = self.channels.lock();
        let tx = channels
            .entry(key.document_id())
            .or_insert_with(|| watch::channel(None).0);
        tx.send_replace(set);
        debug!(target: "insights", key = %key, subscribers = tx.receiver_count(), "benchmark set replaced");
    }
}

#[async_trait]
impl BenchmarkStore for InMemoryBenchmarkStore {
    async fn fetch_by_id(&self, id: &str) -> Result<Option<BenchmarkSet>, FlockError> {
        Ok(self
            .channels
            .lock()
            .get(id)
            .and_then(|tx| tx.borrow().clone()))
    }

    fn subscribe(&self, key: &BenchmarkKey) -> BenchmarkStream {
        let rx = self
            .channels
            .lock()
            .entry(key.document_id())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe();
        WatchStream::new(rx).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flockview_performance::{MetricKey, StatisticalDistribution};

    fn set(mean: f64) -> BenchmarkSet {
        let mut set = BenchmarkSet::default();
        set.metrics.insert(
            MetricKey::ConceptionRate,
            StatisticalDistribution {
                mean,
                median: mean + 2.0,
                p90: mean + 8.0,
                min: 40.0,
                max: 100.0,
                count: 12,
            },
        );
        set
    }

    #[tokio::test]
    async fn subscribers_see_current_value_then_replacements() {
        let store = InMemoryBenchmarkStore::new();
        let key = BenchmarkKey::new("Texel", "North West", 2024);
        store.put(&key, set(80.0));

        let mut stream = store.subscribe(&key);
        assert_eq!(stream.next().await, Some(Some(set(80.0))));
        assert_eq!(store.subscriber_count(&key), 1);

        store.put(&key, set(82.0));
        assert_eq!(stream.next().await, Some(Some(set(82.0))));
        store.remove(&key);
        assert_eq!(stream.next().await, Some(None));

        drop(stream);
        assert_eq!(store.subscriber_count(&key), 0);
    }

    #[tokio::test]
    async fn fetch_by_document_id() {
        let store = InMemoryBenchmarkStore::new();
        let key = BenchmarkKey::new("Texel", "North West", 2024);
        assert_eq!(store.fetch_by_id(&key.document_id()).await.unwrap(), None);

        store.put(&key, set(75.0));
        let fetched = store.fetch_by_id("texel_north-west_2024").await.unwrap();
        assert_eq!(fetched, Some(set(75.0)));
    }

    #[tokio::test]
    async fn unknown_key_streams_none_first() {
        let store = InMemoryBenchmarkStore::new();
        let mut stream = store.subscribe(&BenchmarkKey::new("Suffolk", "Wales", 2023));
        assert_eq!(stream.next().await, Some(None));
    }
}
