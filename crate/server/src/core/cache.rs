//! A bounded key-value cache with least-recently-used eviction and an idle
//! time-to-live enforced by a background sweeper.
//!
//! Expiry is eventually consistent: `get` never checks the TTL, so a stale
//! value may be served for at most one sweep interval after it expired.

use std::{hash::Hash, num::NonZeroUsize, sync::Arc, time::Duration};

use lru::LruCache;
use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

struct Entry<V> {
    value: V,
    last_access: Instant,
}

pub(crate) struct ExpiringCache<K, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    /// `None` disables expiry
    ttl: Option<Duration>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A cache holding at most `capacity` entries (unbounded when `None`)
    pub(crate) fn new(capacity: Option<NonZeroUsize>, ttl: Option<Duration>) -> Self {
        let entries = capacity.map_or_else(LruCache::unbounded, LruCache::new);
        Self {
            entries: Mutex::new(entries),
            ttl,
        }
    }

    /// Insert or replace a value; the least recently used entry is evicted when full
    pub(crate) async fn put(&self, key: K, value: V) {
        let entry = Entry {
            value,
            last_access: Instant::now(),
        };
        self.entries.lock().await.put(key, entry);
    }

    /// The cached value, refreshing its recency and last access time
    pub(crate) async fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(entry.value.clone())
    }

    pub(crate) async fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().await.pop(key).map(|entry| entry.value)
    }

    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Remove the entries idle for longer than the TTL and return how many were removed.
    ///
    /// The lock is released between deletions; each candidate is checked
    /// again before it is removed.
    pub(crate) async fn sweep(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let is_stale = |entry: &Entry<V>| entry.last_access.elapsed() > ttl;
        let stale: Vec<K> = self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, entry)| is_stale(*entry))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = 0;
        for key in stale {
            {
                let mut entries = self.entries.lock().await;
                if entries.peek(&key).is_some_and(is_stale) {
                    entries.pop(&key);
                    removed += 1;
                }
            }
            tokio::task::yield_now().await;
        }
        if removed > 0 {
            debug!("cache sweep: removed {removed} expired entries");
        }
        removed
    }

    /// Run [`Self::sweep`] every `interval` until the returned handle is stopped.
    ///
    /// Returns `None` when expiry or the interval is disabled.
    pub(crate) fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Option<Duration>,
    ) -> Option<SweeperHandle> {
        let (Some(interval), Some(_)) = (interval, self.ttl) else {
            debug!("cache sweeper disabled");
            return None;
        };
        let cache = self.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        trace!("cache sweep");
                        cache.sweep().await;
                    }
                    _ = &mut shutdown_rx => {
                        debug!("cache sweeper: shutdown signal received");
                        break;
                    }
                }
            }
        });
        Some(SweeperHandle {
            shutdown_tx,
            task,
        })
    }
}

/// Owns the sweeper task of an [`ExpiringCache`]
pub(crate) struct SweeperHandle {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Cancel the sweeper and wait for it to finish
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!("the cache sweeper failed: {e}");
        }
    }
}
