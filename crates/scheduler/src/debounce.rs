//! Trailing-edge debounce keyed by merge point.
//!
//! Every `push` replaces the pending payload for its key and restarts that key's quiet
//! window. Only the last payload pushed inside a window reaches the fire callback.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::DebounceConfig;
use crate::epoch::EpochToken;
use crate::metrics;

/// Callback invoked with the coalesced payload once a key's quiet window elapses.
///
/// Runs on a timer task while the teardown gate is held, so it must not block.
pub type FireFn<K, P> = Arc<dyn Fn(K, P) + Send + Sync>;

struct Pending<P> {
    payload: P,
    ticket: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Stats {
    pushed: AtomicU64,
    coalesced: AtomicU64,
    fired: AtomicU64,
    cancelled: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    pub pushed: u64,
    pub coalesced: u64,
    pub fired: u64,
    pub cancelled: u64,
}

struct Inner<K, P> {
    pending: DashMap<K, Pending<P>>,
    fire: FireFn<K, P>,
    epoch: EpochToken,
    window_ms: AtomicU64,
    next_ticket: AtomicU64,
    // read side held while firing, write side while tearing down
    gate: RwLock<()>,
    stats: Stats,
}

pub struct DebounceCoalescer<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    inner: Arc<Inner<K, P>>,
}

impl<K, P> Clone for DebounceCoalescer<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> DebounceCoalescer<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    pub fn new(config: &DebounceConfig, fire: FireFn<K, P>) -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: DashMap::new(),
                fire,
                epoch: EpochToken::new(),
                window_ms: AtomicU64::new(config.quiet_window_ms.max(1)),
                next_ticket: AtomicU64::new(0),
                gate: RwLock::new(()),
                stats: Stats::default(),
            }),
        }
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.inner.window_ms.load(Ordering::Relaxed))
    }

    /// Applies to pushes made after the call; running timers keep their window.
    pub fn set_quiet_window(&self, config: &DebounceConfig) {
        self.inner
            .window_ms
            .store(config.quiet_window_ms.max(1), Ordering::Relaxed);
    }

    /// Replaces the pending payload for `key` and restarts its quiet window.
    /// Must be called from within a tokio runtime.
    pub fn push(&self, key: K, payload: P) {
        let inner = &self.inner;
        let ticket = inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let epoch = inner.epoch.current();
        let window = self.quiet_window();
        inner.stats.pushed.fetch_add(1, Ordering::Relaxed);
        metrics::record_pushed();

        // The shard lock is held while the timer is spawned so the timer can never
        // observe the map before its own entry is in place.
        match inner.pending.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().handle.abort();
                inner.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                metrics::record_coalesced();
                trace!(?key, ticket, "debounce window restarted");
                let handle = spawn_timer(Arc::clone(inner), key, ticket, epoch, window);
                occupied.insert(Pending {
                    payload,
                    ticket,
                    handle,
                });
            }
            Entry::Vacant(vacant) => {
                trace!(?key, ticket, "debounce window opened");
                let handle = spawn_timer(Arc::clone(inner), key, ticket, epoch, window);
                vacant.insert(Pending {
                    payload,
                    ticket,
                    handle,
                });
            }
        }
    }

    /// Aborts every pending timer and drops every pending payload.
    ///
    /// After this returns the fire callback is not invoked again for anything pushed
    /// before the call, even if a timer was already waking up.
    pub fn cancel_all(&self) -> usize {
        let inner = &self.inner;
        let _gate = inner.gate.write();
        inner.epoch.advance();
        let keys: Vec<K> = inner.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut dropped = 0usize;
        for key in keys {
            if let Some((_, pending)) = inner.pending.remove(&key) {
                pending.handle.abort();
                dropped += 1;
            }
        }
        inner
            .stats
            .cancelled
            .fetch_add(dropped as u64, Ordering::Relaxed);
        metrics::record_cancelled(dropped as u64);
        debug!(dropped, "debounce timers cancelled");
        dropped
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.inner.pending.contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.current()
    }

    pub fn stats(&self) -> CoalescerStats {
        let stats = &self.inner.stats;
        CoalescerStats {
            pushed: stats.pushed.load(Ordering::Relaxed),
            coalesced: stats.coalesced.load(Ordering::Relaxed),
            fired: stats.fired.load(Ordering::Relaxed),
            cancelled: stats.cancelled.load(Ordering::Relaxed),
        }
    }
}

fn spawn_timer<K, P>(
    inner: Arc<Inner<K, P>>,
    key: K,
    ticket: u64,
    epoch: u64,
    window: Duration,
) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(window).await;

        let _gate = inner.gate.read();
        if !inner.epoch.is_current(epoch) {
            trace!(?key, ticket, "timer woke into a stale epoch");
            return;
        }
        let Some((key, pending)) = inner
            .pending
            .remove_if(&key, |_, pending| pending.ticket == ticket)
        else {
            return;
        };
        inner.stats.fired.fetch_add(1, Ordering::Relaxed);
        metrics::record_fired();
        trace!(?key, ticket, "debounce window elapsed");
        (inner.fire)(key, pending.payload);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Fired = Arc<Mutex<Vec<(&'static str, u32)>>>;

    fn coalescer(window_ms: u64) -> (DebounceCoalescer<&'static str, u32>, Fired) {
        let fired: Fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let fire: FireFn<&'static str, u32> = Arc::new(move |key, payload| {
            sink.lock().push((key, payload));
        });
        let config = DebounceConfig::new(window_ms).unwrap();
        (DebounceCoalescer::new(&config, fire), fired)
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_last_payload() {
        let (coalescer, fired) = coalescer(120);

        coalescer.push("farms", 1);
        settle(50).await;
        coalescer.push("farms", 2);
        settle(50).await;
        coalescer.push("farms", 3);
        settle(100).await;
        assert!(fired.lock().is_empty(), "window restarted on every push");

        settle(50).await;
        assert_eq!(*fired.lock(), vec![("farms", 3)]);
        let stats = coalescer.stats();
        assert_eq!(stats.pushed, 3);
        assert_eq!(stats.coalesced, 2);
        assert_eq!(stats.fired, 1);
        assert_eq!(coalescer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let (coalescer, fired) = coalescer(100);

        coalescer.push("farms", 1);
        settle(60).await;
        coalescer.push("groups", 7);
        settle(60).await;
        assert_eq!(*fired.lock(), vec![("farms", 1)]);
        assert!(coalescer.is_pending(&"groups"));

        settle(60).await;
        assert_eq!(*fired.lock(), vec![("farms", 1), ("groups", 7)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_prevents_any_further_fire() {
        let (coalescer, fired) = coalescer(120);

        coalescer.push("farms", 1);
        coalescer.push("events", 2);
        settle(119).await;
        let before = coalescer.epoch();
        assert_eq!(coalescer.cancel_all(), 2);
        assert!(coalescer.epoch() > before);

        settle(1_000).await;
        assert!(fired.lock().is_empty());
        assert_eq!(coalescer.stats().cancelled, 2);
        assert_eq!(coalescer.stats().fired, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_after_cancel_start_a_fresh_generation() {
        let (coalescer, fired) = coalescer(120);

        coalescer.push("farms", 1);
        coalescer.cancel_all();
        coalescer.push("farms", 2);
        settle(200).await;
        assert_eq!(*fired.lock(), vec![("farms", 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_can_be_retuned() {
        let (coalescer, fired) = coalescer(120);
        coalescer.set_quiet_window(&DebounceConfig::new(500).unwrap());
        assert_eq!(coalescer.quiet_window(), Duration::from_millis(500));

        coalescer.push("groups", 4);
        settle(300).await;
        assert!(fired.lock().is_empty());
        settle(300).await;
        assert_eq!(*fired.lock(), vec![("groups", 4)]);
    }
}
