use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::time::Instant;

use crate::entry::CacheEntry;
use crate::error::EngineError;
use crate::store::CacheStore;

/// Configuration for MokaStore.
#[derive(Debug, Clone)]
pub struct MokaStoreConfig {
    /// Maximum number of entries the cache can hold.
    pub max_capacity: u64,

    /// Time to idle: entries are evicted if not accessed within this duration.
    /// `None` means entries only leave by ttl or capacity pressure.
    pub time_to_idle: Option<Duration>,
}

impl Default for MokaStoreConfig {
    fn default() -> Self {
        MokaStoreConfig {
            max_capacity: 10_000,
            time_to_idle: None,
        }
    }
}

/// High-concurrency data-cache backend built on Moka.
///
/// Entry expiry still follows the per-entry timestamps of [`CacheEntry`],
/// checked on read; Moka contributes lock-free access and capacity-based
/// eviction. Use this in place of the default in-memory store when many
/// tasks hammer the same engine.
pub struct MokaStore<V>
where
    V: Clone + Send + Sync,
{
    cache: Cache<String, CacheEntry<V>>,
}

impl<V> MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new MokaStore with the given configuration.
    pub fn new(config: MokaStoreConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_capacity);
        if let Some(tti) = config.time_to_idle {
            builder = builder.time_to_idle(tti);
        }
        MokaStore {
            cache: builder.build(),
        }
    }

    /// Entry count and weighted size, for monitoring.
    pub fn stats(&self) -> (u64, u64) {
        (self.cache.entry_count(), self.cache.weighted_size())
    }
}

#[async_trait]
impl<V> CacheStore<V> for MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "moka"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, EngineError> {
        match self.cache.get(key).await {
            Some(entry) => {
                if entry.is_expired(Instant::now()) {
                    self.cache.invalidate(key).await;
                    return Ok(None);
                }
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), EngineError> {
        self.cache
            .insert(key.to_string(), CacheEntry::new(value, ttl))
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), EngineError> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store: MokaStore<String> = MokaStore::new(MokaStoreConfig::default());

        assert!(store.get("key1").await.unwrap().is_none());

        store
            .set("key1", "value1".to_string(), Duration::ZERO)
            .await
            .unwrap();
        let entry = store.get("key1").await.unwrap().unwrap();
        assert_eq!(entry.value, "value1");

        store.delete("key1").await.unwrap();
        assert!(store.get("key1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_removed_on_read() {
        let store: MokaStore<String> = MokaStore::new(MokaStoreConfig::default());
        store
            .set("k", "v".to_string(), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.get("k").await.unwrap().is_none());
        // a second read still misses
        assert!(store.get("k").await.unwrap().is_none());
    }
}
