//! A generic concurrent keyed store with per-entry expiry.
//!
//! Every other store in the signaling core — the dialog table, the location
//! store's bindings, the media session affinity map — is built on top of a
//! `TtlStore`. The store itself knows nothing about SIP, dialogs, or
//! bindings: it is pure "keyed value with a deadline."

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

/// Callback invoked once per entry removed by the background sweeper.
/// Entries removed by an explicit `delete` do not trigger this callback —
/// only sweep-based, deadline-driven removal does.
pub type EvictionCallback<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

struct Entry<V> {
    value: V,
    deadline: Instant,
}

/// A concurrent store keyed by `K`, holding values `V`, each with its own
/// expiry. A single background sweeper removes expired entries at a
/// configurable cadence; `set` on an existing key replaces both value and
/// deadline.
pub struct TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    entries: Arc<DashMap<K, Entry<V>>>,
    on_evict: Option<EvictionCallback<K, V>>,
    evicted_total: Arc<AtomicU64>,
}

impl<K, V> Clone for TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            on_evict: self.on_evict.clone(),
            evicted_total: self.evicted_total.clone(),
        }
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            on_evict: None,
            evicted_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_eviction_callback(on_evict: EvictionCallback<K, V>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            on_evict: Some(on_evict),
            evicted_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert or replace a value and its deadline.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        self.entries.insert(key, Entry { value, deadline });
    }

    /// Returns a clone of the value if present and not past its deadline.
    /// An expired-but-not-yet-swept entry is treated as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.deadline <= Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Removes `key` unconditionally (no eviction callback fires).
    pub fn delete(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// A snapshot of all live (non-expired) entries.
    pub fn all(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|r| r.value().deadline > now)
            .map(|r| (r.key().clone(), r.value().value.clone()))
            .collect()
    }

    /// Invoke `f` for every live entry. `f` is called outside any shard
    /// lock — `all()` is used internally to take the snapshot first.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for (k, v) in self.all() {
            f(&k, &v);
        }
    }

    /// Count of live (non-expired) entries; may include entries that have
    /// expired but have not yet been swept, same as `DashMap::len`.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Total entries removed by the sweeper over this store's lifetime.
    pub fn evicted_total(&self) -> u64 {
        self.evicted_total.load(Ordering::Relaxed)
    }

    /// Remove every currently-expired entry, invoking the eviction callback
    /// (if any) for each, outside of any map lock. Returns the number
    /// evicted.
    pub fn sweep_once(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|r| r.value().deadline <= now)
            .map(|r| r.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for key in expired {
            if let Some((k, entry)) = self.entries.remove(&key) {
                removed.push((k, entry.value));
            }
        }

        let count = removed.len();
        if count > 0 {
            self.evicted_total.fetch_add(count as u64, Ordering::Relaxed);
            if let Some(cb) = &self.on_evict {
                for (k, v) in removed {
                    cb(k, v);
                }
            }
        }
        count
    }

    /// Spawn the background sweeper on the current Tokio runtime. Dropping
    /// the returned handle does not stop the sweeper; call `abort()` on it
    /// to do so.
    pub fn start_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = store.sweep_once();
                if evicted > 0 {
                    debug!("TTL sweeper evicted {} entries", evicted);
                }
            }
        })
    }
}

impl<K, V> Default for TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn get_returns_none_past_deadline() {
        let store: TtlStore<String, i32> = TtlStore::new();
        store.set("a".to_string(), 1, StdDuration::from_millis(10));
        assert_eq!(store.get(&"a".to_string()), Some(1));
        tokio::time::advance(StdDuration::from_millis(20)).await;
        assert_eq!(store.get(&"a".to_string()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_invokes_eviction_callback_once_per_key() {
        let evicted = Arc::new(Mutex::new(Vec::new()));
        let evicted_clone = evicted.clone();
        let store: TtlStore<String, i32> =
            TtlStore::with_eviction_callback(Arc::new(move |k, v| {
                evicted_clone.lock().unwrap().push((k, v));
            }));
        store.set("a".to_string(), 1, StdDuration::from_millis(10));
        store.set("b".to_string(), 2, StdDuration::from_secs(100));

        tokio::time::advance(StdDuration::from_millis(20)).await;
        let swept = store.sweep_once();

        assert_eq!(swept, 1);
        assert_eq!(evicted.lock().unwrap().as_slice(), &[("a".to_string(), 1)]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.evicted_total(), 1);
    }

    #[tokio::test]
    async fn set_on_existing_key_replaces_value_and_deadline() {
        let store: TtlStore<String, i32> = TtlStore::new();
        store.set("a".to_string(), 1, StdDuration::from_secs(60));
        store.set("a".to_string(), 2, StdDuration::from_secs(60));
        assert_eq!(store.get(&"a".to_string()), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_does_not_invoke_eviction_callback() {
        let evicted = Arc::new(Mutex::new(0));
        let evicted_clone = evicted.clone();
        let store: TtlStore<String, i32> =
            TtlStore::with_eviction_callback(Arc::new(move |_, _| {
                *evicted_clone.lock().unwrap() += 1;
            }));
        store.set("a".to_string(), 1, StdDuration::from_secs(60));
        store.delete(&"a".to_string());
        assert_eq!(*evicted.lock().unwrap(), 0);
    }
}
