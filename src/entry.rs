use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::FetchError;

/// A cache entry containing a value and its lifecycle timestamps.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached value.
    pub value: V,

    /// When the entry was written. Revalidation uses this to collapse
    /// requests that land inside the deduping window.
    pub created_at: Instant,

    /// When the entry stops being served. `None` means it never auto-expires.
    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    /// Create a new entry. A zero `ttl` means the entry lives forever.
    pub fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        CacheEntry {
            value,
            created_at: now,
            expires_at: if ttl.is_zero() { None } else { Some(now + ttl) },
        }
    }

    /// Whether the entry has expired as of `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    /// Time elapsed since the entry was written.
    pub fn age(&self, now: Instant) -> Duration {
        now.duration_since(self.created_at)
    }
}

/// The canonical last-known result for a key: the most recent data, the most
/// recent error, and whether a refresh is currently in flight.
///
/// `data` and `error` are deliberately independent. A failed refresh keeps the
/// last good `data` (stale-if-error) and a successful refresh clears `error`.
///
/// Errors are transient and skipped on serialization; a durable store adapter
/// rehydrates envelopes with `error: None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    #[serde(skip)]
    pub error: Option<FetchError>,
    pub is_validating: bool,
}

impl<T> Envelope<T> {
    /// Envelope for a settled fetch result.
    pub(crate) fn settled(result: Result<T, FetchError>) -> Self {
        match result {
            Ok(data) => Envelope {
                data: Some(data),
                error: None,
                is_validating: false,
            },
            Err(error) => Envelope {
                data: None,
                error: Some(error),
                is_validating: false,
            },
        }
    }
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Envelope {
            data: None,
            error: None,
            is_validating: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let entry = CacheEntry::new("v", Duration::ZERO);
        assert!(entry.expires_at.is_none());
        tokio::time::sleep(Duration::from_secs(86_400)).await;
        assert!(!entry.is_expired(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finite_ttl_expires() {
        let entry = CacheEntry::new("v", Duration::from_millis(100));
        assert!(!entry.is_expired(Instant::now()));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(entry.is_expired(Instant::now()));
    }

    #[test]
    fn test_settled_envelope() {
        let ok: Envelope<u32> = Envelope::settled(Ok(7));
        assert_eq!(ok.data, Some(7));
        assert!(ok.error.is_none());
        assert!(!ok.is_validating);

        let err: Envelope<u32> = Envelope::settled(Err(FetchError::msg("boom")));
        assert!(err.data.is_none());
        assert!(err.error.is_some());
    }
}
