//! Subscriber registry: which state slots are watching which key.
//!
//! The registry maps a serialized key to an arena of slot handles with stable
//! ids. Teardown removes an id; nothing filters a shared list in place. The
//! registry only ever holds non-owning `Arc` handles to slots owned by their
//! consumers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::entry::Envelope;
use crate::error::FetchError;
use crate::stores::memory::ExpiringCache;

/// Extra lifetime granted to registry entries beyond the data ttl so the
/// registry does not vanish just as a fresh consumer mounts.
const REGISTRY_GRACE: Duration = Duration::from_secs(5);

/// Stable handle for one registered state slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// The mutable per-consumer record the engine pushes updates into.
///
/// A slot is owned by its consumer; the registry and in-flight commits hold
/// `Arc` references only. Reads are synchronous so a consumer can snapshot
/// its state without awaiting.
pub struct StateSlot<T> {
    state: RwLock<SlotState<T>>,
}

struct SlotState<T> {
    data: Option<T>,
    error: Option<FetchError>,
    is_validating: bool,
    key: String,
}

impl<T> StateSlot<T>
where
    T: Clone,
{
    pub(crate) fn new() -> Self {
        StateSlot {
            state: RwLock::new(SlotState {
                data: None,
                error: None,
                is_validating: false,
                key: String::new(),
            }),
        }
    }

    /// Last known data for the tracked key.
    pub fn data(&self) -> Option<T> {
        self.state.read().data.clone()
    }

    /// Last revalidation error, cleared by the next success.
    pub fn error(&self) -> Option<FetchError> {
        self.state.read().error.clone()
    }

    /// Whether a refresh for this slot is currently in flight.
    pub fn is_validating(&self) -> bool {
        self.state.read().is_validating
    }

    /// The serialized key this slot currently tracks.
    pub fn key(&self) -> String {
        self.state.read().key.clone()
    }

    /// Consistent snapshot of the whole slot.
    pub fn snapshot(&self) -> Envelope<T> {
        let state = self.state.read();
        Envelope {
            data: state.data.clone(),
            error: state.error.clone(),
            is_validating: state.is_validating,
        }
    }

    pub(crate) fn set_validating(&self, is_validating: bool) {
        self.state.write().is_validating = is_validating;
    }

    pub(crate) fn set_key(&self, key: &str) {
        self.state.write().key = key.to_string();
    }

    /// Publish cached state into the slot ahead of a fetch decision. Data is
    /// only copied when present so a data-less error entry cannot blank out
    /// what the consumer already sees.
    pub(crate) fn publish_cached(&self, envelope: &Envelope<T>) {
        let mut state = self.state.write();
        if let Some(data) = &envelope.data {
            state.data = Some(data.clone());
        }
        state.error = envelope.error.clone();
    }

    /// Apply a committed envelope. `data_changed` is false when the compare
    /// function judged the fresh value equal to the previous one; the slot
    /// then keeps its current data and only the error/validating fields move.
    pub(crate) fn apply(&self, envelope: &Envelope<T>, data_changed: bool) {
        let mut state = self.state.write();
        if data_changed {
            if let Some(data) = &envelope.data {
                state.data = Some(data.clone());
            }
        }
        state.error = envelope.error.clone();
        state.is_validating = envelope.is_validating;
    }
}

type SlotSet<T> = Arc<RwLock<HashMap<SubscriberId, Arc<StateSlot<T>>>>>;

/// Registry of live slots per serialized key.
pub(crate) struct SubscriberRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: ExpiringCache<SlotSet<T>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for SubscriberRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        SubscriberRegistry {
            entries: self.entries.clone(),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<T> SubscriberRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        SubscriberRegistry {
            entries: ExpiringCache::new(Duration::ZERO),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a slot under `key` and return its stable id. `ttl` is the
    /// data ttl; the registry entry outlives it by a grace period.
    pub(crate) async fn register(
        &self,
        key: &str,
        slot: Arc<StateSlot<T>>,
        ttl: Duration,
    ) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Some(entry) = self.entries.get(key).await {
            entry.value.write().insert(id, slot);
        } else {
            let ttl = if ttl.is_zero() {
                ttl
            } else {
                ttl + REGISTRY_GRACE
            };
            let set: SlotSet<T> = Arc::new(RwLock::new(HashMap::from([(id, slot)])));
            self.entries.set(key, set, ttl).await;
        }
        id
    }

    /// Remove one slot from a key's arena.
    pub(crate) async fn unregister(&self, key: &str, id: SubscriberId) {
        if let Some(entry) = self.entries.get(key).await {
            entry.value.write().remove(&id);
        }
    }

    /// All slot handles currently registered under `key`.
    pub(crate) async fn slots_for(&self, key: &str) -> Vec<Arc<StateSlot<T>>> {
        match self.entries.get(key).await {
            Some(entry) => entry.value.read().values().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry: SubscriberRegistry<u32> = SubscriberRegistry::new();
        let slot_a = Arc::new(StateSlot::new());
        let slot_b = Arc::new(StateSlot::new());

        let id_a = registry.register("k", slot_a, Duration::ZERO).await;
        let id_b = registry.register("k", slot_b, Duration::ZERO).await;
        assert_ne!(id_a, id_b);
        assert_eq!(registry.slots_for("k").await.len(), 2);

        registry.unregister("k", id_a).await;
        assert_eq!(registry.slots_for("k").await.len(), 1);

        registry.unregister("k", id_b).await;
        assert!(registry.slots_for("k").await.is_empty());
    }

    #[tokio::test]
    async fn test_slots_are_isolated_by_key() {
        let registry: SubscriberRegistry<u32> = SubscriberRegistry::new();
        registry
            .register("a", Arc::new(StateSlot::new()), Duration::ZERO)
            .await;
        assert!(registry.slots_for("b").await.is_empty());
    }

    #[test]
    fn test_apply_respects_data_changed() {
        let slot: StateSlot<u32> = StateSlot::new();
        slot.apply(
            &Envelope {
                data: Some(1),
                error: None,
                is_validating: false,
            },
            true,
        );
        assert_eq!(slot.data(), Some(1));

        // unchanged commit keeps the current data
        slot.apply(
            &Envelope {
                data: Some(2),
                error: None,
                is_validating: false,
            },
            false,
        );
        assert_eq!(slot.data(), Some(1));
    }

    #[test]
    fn test_apply_never_blanks_data() {
        let slot: StateSlot<u32> = StateSlot::new();
        slot.apply(
            &Envelope {
                data: Some(1),
                error: None,
                is_validating: false,
            },
            true,
        );
        slot.apply(
            &Envelope {
                data: None,
                error: Some(FetchError::msg("boom")),
                is_validating: false,
            },
            true,
        );
        assert_eq!(slot.data(), Some(1));
        assert!(slot.error().is_some());
    }
}
