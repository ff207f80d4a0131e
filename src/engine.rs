use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{CompareFn, Config};
use crate::dedupe::InflightRegistry;
use crate::entry::{CacheEntry, Envelope};
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::key::Key;
use crate::revalidate::Subscription;
use crate::store::CacheStore;
use crate::stores::memory::ExpiringCache;
use crate::subscribers::SubscriberRegistry;

/// The stale-while-revalidate coordination context.
///
/// An engine owns the three caches the revalidation protocol runs over: the
/// data cache (last known result per key), the in-flight registry
/// (deduplicated fetches), and the subscriber registry (live state slots per
/// key). Engines are independent; construct one per process, or one per test.
/// Cloning an engine yields another handle on the same caches.
///
/// Consumers attach through [`Engine::subscribe`]; external writes go through
/// [`Engine::mutate`], which is also how independent consumers of one key
/// observe each other's updates.
pub struct Engine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) data: Arc<dyn CacheStore<Envelope<T>>>,
    pub(crate) inflight: InflightRegistry<T>,
    pub(crate) subscribers: SubscriberRegistry<T>,
    pub(crate) default_ttl: Duration,
}

impl<T> Clone for Engine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Engine {
            data: Arc::clone(&self.data),
            inflight: self.inflight.clone(),
            subscribers: self.subscribers.clone(),
            default_ttl: self.default_ttl,
        }
    }
}

impl<T> Engine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an engine backed by the default in-memory data cache.
    pub fn new() -> Self {
        Self::with_data_cache(Arc::new(ExpiringCache::new(Duration::ZERO)))
    }

    /// Create an engine over an alternate data cache backend. The backend
    /// must honor the [`CacheStore`] contract, including zero-ttl-is-forever.
    pub fn with_data_cache(data: Arc<dyn CacheStore<Envelope<T>>>) -> Self {
        Engine {
            data,
            inflight: InflightRegistry::new(),
            subscribers: SubscriberRegistry::new(),
            default_ttl: Duration::ZERO,
        }
    }

    /// Attach a consumer to `key`. The returned subscription drives the
    /// revalidation protocol for one state slot; call
    /// [`Subscription::activate`] once the consumer is mounted.
    pub async fn subscribe(
        &self,
        key: Key,
        fetcher: Option<Arc<dyn Fetcher<T>>>,
        config: Config<T>,
    ) -> Subscription<T> {
        Subscription::new(self.clone(), key, fetcher, config).await
    }

    /// Read the current envelope for `key` without triggering anything.
    pub async fn peek(&self, key: &Key) -> Option<Envelope<T>> {
        let resolved = key.resolve();
        if !resolved.is_active() {
            return None;
        }
        self.cache_get(resolved.serialized())
            .await
            .map(|entry| entry.value)
    }

    /// Drop the cached entry for `key`.
    pub async fn invalidate(&self, key: &Key) {
        let resolved = key.resolve();
        if !resolved.is_active() {
            return;
        }
        if let Err(err) = self.data.delete(resolved.serialized()).await {
            warn!(store = self.data.name(), error = %err, "data cache delete failed");
        }
    }

    /// Inject `value` for `key` and fan it out to every subscriber still
    /// tracking the key. Uses the engine's default ttl.
    pub async fn mutate(&self, key: &Key, value: T) -> Envelope<T> {
        self.mutate_with(key, async move { Ok(value) }).await
    }

    /// Settle `fut` and inject its result: success becomes `data`, failure
    /// becomes `error`. The envelope is written to the data cache only when
    /// data is present; fan-out happens either way.
    pub async fn mutate_with<F>(&self, key: &Key, fut: F) -> Envelope<T>
    where
        F: Future<Output = Result<T, FetchError>> + Send,
    {
        self.mutate_with_ttl(key, fut, self.default_ttl).await
    }

    /// [`Engine::mutate_with`] with an explicit cache ttl for this write.
    pub async fn mutate_with_ttl<F>(&self, key: &Key, fut: F, ttl: Duration) -> Envelope<T>
    where
        F: Future<Output = Result<T, FetchError>> + Send,
    {
        let resolved = key.resolve();
        if !resolved.is_active() {
            return Envelope::default();
        }
        let result = fut.await;
        self.commit(resolved.serialized(), result, ttl, false, None)
            .await
    }

    /// Commit one settled result for `key` into the data cache and fan it
    /// out to every slot whose current key still equals `key`.
    ///
    /// `store_error` selects the revalidation write policy: a failure is
    /// recorded in the cache alongside the last good data. Without it
    /// (the mutate path) failures are fanned out but not persisted. Data is
    /// never blanked out by a result that carries none.
    pub(crate) async fn commit(
        &self,
        key: &str,
        result: Result<T, FetchError>,
        ttl: Duration,
        store_error: bool,
        compare: Option<CompareFn<T>>,
    ) -> Envelope<T> {
        let previous = self.cache_get(key).await;

        let mut envelope = Envelope::settled(result);
        let mut data_changed = true;
        if let (Some(next), Some(prev)) = (
            &envelope.data,
            previous.as_ref().and_then(|e| e.value.data.as_ref()),
        ) {
            data_changed = !values_equal(compare.as_ref(), prev, next);
        }

        if envelope.data.is_some() {
            self.cache_set(key, envelope.clone(), ttl).await;
        } else if envelope.error.is_some() && store_error {
            // keep the last good data next to the error
            envelope.data = previous.and_then(|entry| entry.value.data);
            self.cache_set(key, envelope.clone(), ttl).await;
        }

        self.fan_out(key, &envelope, data_changed).await;
        envelope
    }

    /// Update every registered slot still tracking `key`. A consumer may
    /// have switched keys while the fetch was outstanding; its slot is
    /// skipped here while the data cache keeps the committed result.
    async fn fan_out(&self, key: &str, envelope: &Envelope<T>, data_changed: bool) {
        let slots = self.subscribers.slots_for(key).await;
        let mut updated = 0usize;
        for slot in slots.iter().filter(|slot| slot.key() == key) {
            slot.apply(envelope, data_changed);
            updated += 1;
        }
        if updated > 0 {
            debug!(key, updated, "fanned out committed envelope");
        }
    }

    pub(crate) async fn cache_get(&self, key: &str) -> Option<CacheEntry<Envelope<T>>> {
        match self.data.get(key).await {
            Ok(entry) => entry,
            Err(err) => {
                warn!(store = self.data.name(), error = %err, "data cache read failed; treating as miss");
                None
            }
        }
    }

    pub(crate) async fn cache_set(&self, key: &str, value: Envelope<T>, ttl: Duration) {
        if let Err(err) = self.data.set(key, value, ttl).await {
            warn!(store = self.data.name(), error = %err, "data cache write failed");
        }
    }
}

impl<T> Default for Engine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Equality between the previous and freshly fetched value. A panicking
/// custom compare fails open as "changed" so it can never take down the
/// commit path.
fn values_equal<T: PartialEq>(compare: Option<&CompareFn<T>>, prev: &T, next: &T) -> bool {
    match compare {
        None => prev == next,
        Some(compare) => match panic::catch_unwind(AssertUnwindSafe(|| compare.as_ref()(prev, next))) {
            Ok(equal) => equal,
            Err(_) => {
                warn!("compare function panicked; treating value as changed");
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mutate_writes_and_peek_reads() {
        let engine: Engine<String> = Engine::new();
        let key = Key::literal("user:1");

        let envelope = engine.mutate(&key, "Alice".to_string()).await;
        assert_eq!(envelope.data.as_deref(), Some("Alice"));
        assert!(envelope.error.is_none());

        let peeked = engine.peek(&key).await.unwrap();
        assert_eq!(peeked.data.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_mutate_with_failure_is_not_persisted() {
        let engine: Engine<String> = Engine::new();
        let key = Key::literal("user:1");

        let envelope = engine
            .mutate_with(&key, async { Err(FetchError::msg("boom")) })
            .await;
        assert!(envelope.data.is_none());
        assert!(envelope.error.is_some());
        assert!(engine.peek(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_previous_data() {
        let engine: Engine<String> = Engine::new();
        let key = Key::literal("user:1");
        engine.mutate(&key, "Alice".to_string()).await;

        let envelope = engine
            .commit(
                "user:1",
                Err(FetchError::msg("boom")),
                Duration::ZERO,
                true,
                None,
            )
            .await;
        assert_eq!(envelope.data.as_deref(), Some("Alice"));
        assert!(envelope.error.is_some());

        let peeked = engine.peek(&key).await.unwrap();
        assert_eq!(peeked.data.as_deref(), Some("Alice"));
        assert!(peeked.error.is_some());
    }

    #[tokio::test]
    async fn test_mutate_on_inactive_key_is_a_noop() {
        let engine: Engine<String> = Engine::new();
        let envelope = engine.mutate(&Key::Inactive, "x".to_string()).await;
        assert!(envelope.data.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let engine: Engine<String> = Engine::new();
        let key = Key::literal("user:1");
        engine.mutate(&key, "Alice".to_string()).await;
        engine.invalidate(&key).await;
        assert!(engine.peek(&key).await.is_none());
    }

    #[test]
    fn test_values_equal_fails_open_on_panic() {
        let compare: CompareFn<u32> = Arc::new(|_, _| panic!("bad compare"));
        assert!(!values_equal(Some(&compare), &1, &1));
        assert!(values_equal(None, &1, &1));
        assert!(!values_equal(None, &1, &2));
    }
}
