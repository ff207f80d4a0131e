//! Builder API for engine construction.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::entry::Envelope;
use crate::store::CacheStore;

/// Builder for [`Engine`] instances.
///
/// # Example
///
/// ```ignore
/// use swr_engine::{Engine, MokaStore, MokaStoreConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let engine: Engine<String> = Engine::builder()
///     .data_cache(Arc::new(MokaStore::new(MokaStoreConfig::default())))
///     .default_ttl(Duration::from_secs(300))
///     .build();
/// ```
pub struct EngineBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    data_cache: Option<Arc<dyn CacheStore<Envelope<T>>>>,
    default_ttl: Duration,
}

impl<T> EngineBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        EngineBuilder {
            data_cache: None,
            default_ttl: Duration::ZERO,
        }
    }

    /// Back the engine with an alternate data cache.
    pub fn data_cache(mut self, cache: Arc<dyn CacheStore<Envelope<T>>>) -> Self {
        self.data_cache = Some(cache);
        self
    }

    /// Time-to-live applied to writes that do not specify one. Zero means
    /// entries never expire.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn build(self) -> Engine<T> {
        let mut engine = match self.data_cache {
            Some(cache) => Engine::with_data_cache(cache),
            None => Engine::new(),
        };
        engine.default_ttl = self.default_ttl;
        engine
    }
}

impl<T> Default for EngineBuilder<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Engine<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Start building an engine.
    pub fn builder() -> EngineBuilder<T> {
        EngineBuilder::new()
    }
}
