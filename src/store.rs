use std::time::Duration;

use async_trait::async_trait;

use crate::entry::CacheEntry;
use crate::error::EngineError;

/// A cache store is the minimal contract the engine's data cache honors:
/// read, write with a time-to-live, delete.
///
/// The default implementation is the in-memory [`ExpiringCache`]; any backend
/// that keeps the same semantics (including durable ones) can be swapped in
/// when constructing an engine.
///
/// [`ExpiringCache`]: crate::stores::memory::ExpiringCache
#[async_trait]
pub trait CacheStore<V>: Send + Sync
where
    V: Clone + Send + Sync,
{
    /// A name for logging.
    ///
    /// # Example
    /// - "memory"
    /// - "moka"
    fn name(&self) -> &'static str;

    /// Return the cached entry, or `None` for misses and expired entries.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>, EngineError>;

    /// Set the value for the given key.
    ///
    /// A zero `ttl` means the entry never auto-expires. It must never be
    /// read as "do not cache".
    async fn set(&self, key: &str, value: V, ttl: Duration) -> Result<(), EngineError>;

    /// Remove the key from the store.
    async fn delete(&self, key: &str) -> Result<(), EngineError>;
}
