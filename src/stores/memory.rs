use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::entry::CacheEntry;
use crate::error::EngineError;
use crate::store::CacheStore;

type Items<V> = Arc<RwLock<HashMap<String, CacheEntry<V>>>>;

/// Thread-safe in-memory cache with per-entry time-to-live eviction.
///
/// Expired entries are evicted lazily on `get` and by a one-shot timer task
/// spawned per `set`. The timer re-checks expiry when it fires instead of
/// deleting unconditionally: an entry overwritten with a later deadline
/// survives the earlier entry's timer.
///
/// This is the default backing for the engine's data cache and is also
/// instantiated for the in-flight fetch registry and the subscriber registry.
pub struct ExpiringCache<V>
where
    V: Clone + Send + Sync,
{
    items: Items<V>,
    default_ttl: Duration,
}

impl<V> Clone for ExpiringCache<V>
where
    V: Clone + Send + Sync,
{
    fn clone(&self) -> Self {
        ExpiringCache {
            items: Arc::clone(&self.items),
            default_ttl: self.default_ttl,
        }
    }
}

impl<V> ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache. `default_ttl` applies when `set` is called with a
    /// zero ttl; a zero default means such entries never expire.
    pub fn new(default_ttl: Duration) -> Self {
        ExpiringCache {
            items: Arc::new(RwLock::new(HashMap::new())),
            default_ttl,
        }
    }

    /// Return the entry for `key`, evicting it first if it has expired.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        {
            let items = self.items.read().await;
            match items.get(key) {
                Some(entry) if !entry.is_expired(now) => return Some(entry.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // expired on read; re-check under the write lock since the entry may
        // have been replaced in between
        let mut items = self.items.write().await;
        if let Some(entry) = items.get(key) {
            if entry.is_expired(Instant::now()) {
                items.remove(key);
            } else {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Insert `value` under `key`. A zero `ttl` falls back to the cache
    /// default; a zero effective ttl means the entry lives forever.
    pub async fn set(&self, key: &str, value: V, ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let entry = CacheEntry::new(value, ttl);
        let deadline = entry.expires_at;
        {
            let mut items = self.items.write().await;
            items.insert(key.to_string(), entry);
        }
        if let Some(deadline) = deadline {
            self.dispatch_expire(key.to_string(), deadline);
        }
    }

    /// Remove the key immediately.
    pub async fn delete(&self, key: &str) {
        self.items.write().await.remove(key);
    }

    /// Number of entries currently held, including not-yet-evicted expired
    /// ones.
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    fn dispatch_expire(&self, key: String, deadline: Instant) {
        let items: Weak<RwLock<HashMap<String, CacheEntry<V>>>> = Arc::downgrade(&self.items);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(items) = items.upgrade() else {
                return;
            };
            let mut items = items.write().await;
            if let Some(entry) = items.get(&key) {
                if entry.is_expired(Instant::now()) {
                    items.remove(&key);
                }
            }
        });
    }
}

#[async_trait]
impl<V> CacheStore<V> for ExpiringCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, EngineError> {
        Ok(ExpiringCache::get(self, key).await)
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), EngineError> {
        ExpiringCache::set(self, key, value, ttl).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        ExpiringCache::delete(self, key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache: ExpiringCache<String> = ExpiringCache::new(Duration::ZERO);

        assert!(cache.get("key1").await.is_none());

        cache.set("key1", "value1".to_string(), Duration::ZERO).await;
        let entry = cache.get("key1").await.unwrap();
        assert_eq!(entry.value, "value1");
        assert!(entry.expires_at.is_none());

        cache.delete("key1").await;
        assert!(cache.get("key1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finite_ttl_expires_on_schedule() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::ZERO);
        cache.set("a", 1, Duration::from_millis(100)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get("a").await.map(|e| e.value), Some(1));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_means_forever() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::ZERO);
        cache.set("a", 1, Duration::ZERO).await;

        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get("a").await.map(|e| e.value), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_eviction_removes_entry_without_reads() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::ZERO);
        cache.set("a", 1, Duration::from_millis(100)).await;
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_survives_stale_timer() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::ZERO);
        cache.set("a", 1, Duration::from_millis(100)).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        cache.set("a", 2, Duration::from_millis(100)).await;

        // t=120: the first entry's timer has fired but the replacement is not
        // yet expired
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert_eq!(cache.get("a").await.map(|e| e.value), Some(2));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("a").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_fallback() {
        let cache: ExpiringCache<u32> = ExpiringCache::new(Duration::from_millis(200));
        cache.set("a", 1, Duration::ZERO).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.get("a").await.is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cache.get("a").await.is_none());
    }
}
