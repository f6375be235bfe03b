//! TTL-bound registry
//!
//! A keyed map whose entries expire after a fixed time-to-live. Expiry is
//! observed lazily on access and eagerly by an optional background sweep
//! running on the tokio runtime. The expiry callback always runs outside the
//! registry lock, on the thread that noticed the expiry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Called with each entry that expired
pub type ExpireCallback<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TtlOptions {
    pub ttl: Duration,
    /// Period of the background sweep
    pub cleanup_interval: Duration,
    /// Inserting past this evicts the entry closest to expiry
    pub max_entries: Option<usize>,
    /// Renew an entry's deadline whenever it is read
    pub touch_on_access: bool,
}

impl Default for TtlOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(60),
            max_entries: None,
            touch_on_access: true,
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    options: TtlOptions,
    on_expire: Option<ExpireCallback<K, V>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(K, V)> = {
            let mut entries = self.entries.lock();
            let keys: Vec<K> = entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| entries.remove(&k).map(|e| (k, e.value)))
                .collect()
        };

        let count = expired.len();
        self.notify(expired);
        count
    }

    fn notify(&self, expired: Vec<(K, V)>) {
        if let Some(callback) = &self.on_expire {
            for (key, value) in expired {
                callback(key, value);
            }
        }
    }
}

impl<K, V> Drop for Inner<K, V> {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// Shared handle to a TTL registry; clones see the same entries
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Send + 'static,
{
    pub fn new(options: TtlOptions) -> Self {
        Self::build(options, None)
    }

    pub fn with_on_expire(options: TtlOptions, on_expire: ExpireCallback<K, V>) -> Self {
        Self::build(options, Some(on_expire))
    }

    fn build(options: TtlOptions, on_expire: Option<ExpireCallback<K, V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                options,
                on_expire,
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &TtlOptions {
        &self.inner.options
    }

    /// Insert or replace, resetting the deadline
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let expires_at = Instant::now() + self.inner.options.ttl;
        let mut entries = self.inner.entries.lock();

        if let Some(max) = self.inner.options.max_entries {
            if entries.len() >= max && !entries.contains_key(&key) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                    debug!("TTL registry full, evicted the entry closest to expiry");
                }
            }
        }

        entries
            .insert(key, Entry { value, expires_at })
            .map(|e| e.value)
    }

    /// Renew an entry's deadline; false if it is missing or already expired
    pub fn touch(&self, key: &K) -> bool {
        self.with_live(key, |entry| {
            entry.expires_at = Instant::now() + self.inner.options.ttl;
        })
        .is_some()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.with_live(key, |_| ()).is_some()
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.entries.lock().remove(key).map(|e| e.value)
    }

    pub fn expires_at(&self, key: &K) -> Option<Instant> {
        self.with_live(key, |entry| entry.expires_at)
    }

    /// Entries that have not yet expired
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|(_, e)| e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Remove every expired entry, firing the callback for each
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Remove everything without firing the callback
    pub fn clear(&self) -> Vec<(K, V)> {
        self.inner.entries.lock().drain().map(|(k, e)| (k, e.value)).collect()
    }

    /// Spawn the periodic sweep. No-op without a tokio runtime or when a
    /// sweep is already running.
    pub fn start_auto_cleanup(&self) -> bool {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            debug!("No tokio runtime, TTL sweep not started");
            return false;
        };

        let weak: Weak<Inner<K, V>> = Arc::downgrade(&self.inner);
        let period = self.inner.options.cleanup_interval;
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let purged = inner.purge_expired();
                if purged > 0 {
                    debug!("TTL sweep removed {} expired entr(ies)", purged);
                }
            }
        }));
        true
    }

    pub fn stop_auto_cleanup(&self) {
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Stop the sweep and drop every entry
    pub fn dispose(&self) {
        self.stop_auto_cleanup();
        self.clear();
    }

    /// Run `f` on a live entry; an expired one is removed and reported
    fn with_live<R>(&self, key: &K, f: impl FnOnce(&mut Entry<V>) -> R) -> Option<R> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();
        let expired = entries.get(key)?.expires_at <= now;
        if !expired {
            return entries.get_mut(key).map(f);
        }

        let removed = entries.remove(key).map(|e| (key.clone(), e.value));
        drop(entries);
        self.inner.notify(removed.into_iter().collect());
        None
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Read a live entry, renewing it when `touch_on_access` is set
    pub fn get(&self, key: &K) -> Option<V> {
        let touch = self.inner.options.touch_on_access;
        let ttl = self.inner.options.ttl;
        self.with_live(key, |entry| {
            if touch {
                entry.expires_at = Instant::now() + ttl;
            }
            entry.value.clone()
        })
    }

    /// Read without renewing
    pub fn peek(&self, key: &K) -> Option<V> {
        self.with_live(key, |entry| entry.value.clone())
    }

    pub fn values(&self) -> Vec<V> {
        let now = Instant::now();
        self.inner
            .entries
            .lock()
            .values()
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options(ttl_secs: u64) -> TtlOptions {
        TtlOptions {
            ttl: Duration::from_secs(ttl_secs),
            cleanup_interval: Duration::from_secs(1),
            max_entries: None,
            touch_on_access: true,
        }
    }

    fn recording(ttl_secs: u64) -> (TtlCache<String, u32>, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cache = TtlCache::with_on_expire(
            options(ttl_secs),
            Arc::new(move |key: String, _value: u32| sink.lock().push(key)),
        );
        (cache, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_lazily() {
        let (cache, seen) = recording(10);
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(*seen.lock(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_access_renews_deadline() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(options(10));
        cache.insert("a", 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.peek(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.peek(&"a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_fires_callback() {
        let (cache, seen) = recording(5);
        assert!(cache.start_auto_cleanup());
        assert!(!cache.start_auto_cleanup());

        cache.insert("stale".to_string(), 1);
        tokio::time::sleep(Duration::from_secs(7)).await;

        assert_eq!(*seen.lock(), vec!["stale".to_string()]);
        assert!(cache.is_empty());
        cache.dispose();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_sweep_leaves_entries_for_lazy_expiry() {
        let (cache, seen) = recording(5);
        cache.start_auto_cleanup();
        cache.stop_auto_cleanup();

        cache.insert("k".to_string(), 1);
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(seen.lock().is_empty());

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(*seen.lock(), vec!["k".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_evicts_closest_to_expiry() {
        let cache: TtlCache<u32, u32> = TtlCache::new(TtlOptions {
            max_entries: Some(2),
            ..options(10)
        });
        cache.insert(1, 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(2, 2);
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.insert(3, 3);

        let mut keys = cache.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_drops_without_callback() {
        let (cache, seen) = recording(5);
        cache.insert("a".to_string(), 1);
        cache.dispose();
        assert!(cache.is_empty());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_sweep_needs_runtime() {
        let cache: TtlCache<u32, u32> = TtlCache::new(TtlOptions::default());
        assert!(!cache.start_auto_cleanup());
    }
}
