//! In-flight fetch deduplication.
//!
//! One shared future per key, alive for the deduping window. Every caller
//! that races in while a fetch is outstanding awaits the same settlement
//! instead of invoking the fetcher again; the settled entry is removed so the
//! next interval tick can fetch anew.

use std::time::Duration;

use futures::future::{BoxFuture, Shared};

use crate::error::FetchError;
use crate::stores::memory::ExpiringCache;

/// A deduplicated in-flight fetch. Cloning yields another handle on the same
/// underlying future.
pub(crate) type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;

pub(crate) struct InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: ExpiringCache<SharedFetch<T>>,
}

impl<T> Clone for InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        InflightRegistry {
            entries: self.entries.clone(),
        }
    }
}

impl<T> InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        InflightRegistry {
            entries: ExpiringCache::new(Duration::ZERO),
        }
    }

    /// The in-flight fetch for `key`, if one is outstanding.
    pub(crate) async fn get(&self, key: &str) -> Option<SharedFetch<T>> {
        self.entries.get(key).await.map(|entry| entry.value)
    }

    /// Record an in-flight fetch for the deduping window. The entry's
    /// creation time is the fetch start time.
    pub(crate) async fn insert(&self, key: &str, fetch: SharedFetch<T>, window: Duration) {
        self.entries.set(key, fetch, window).await;
    }

    /// Drop the entry once its fetch has settled and been committed.
    pub(crate) async fn remove(&self, key: &str) {
        self.entries.delete(key).await;
    }
}
