//! The revalidation coordinator.
//!
//! A [`Subscription`] binds one consumer's state slot to a key and re-runs
//! the same decision sequence on every trigger (activation, key change,
//! polling tick, focus event, retry, forced refresh): serve whatever the
//! cache holds immediately, then decide whether a fetch is warranted, collapse
//! it with any in-flight fetch for the key, and commit the settlement for
//! every watcher of the key.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use crate::config::{Config, RevalidateOptions};
use crate::engine::Engine;
use crate::entry::Envelope;
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::key::{Key, ResolvedKey};
use crate::retry::schedule_retry;
use crate::subscribers::{StateSlot, SubscriberId};

struct Registration {
    key: ResolvedKey,
    id: Option<SubscriberId>,
}

/// One consumer's binding to a key.
///
/// The reactive layer owns the subscription: it calls [`activate`] on mount,
/// [`deactivate`] on unmount (required; polling stops and the slot is
/// unregistered), [`set_key`] when the consumer's key dependency changes, and
/// [`on_focus`] from its visibility events. State is read synchronously from
/// the slot accessors. Cloning yields another handle on the same slot.
///
/// [`activate`]: Subscription::activate
/// [`deactivate`]: Subscription::deactivate
/// [`set_key`]: Subscription::set_key
/// [`on_focus`]: Subscription::on_focus
pub struct Subscription<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    state: Arc<SubscriptionState<T>>,
}

impl<T> Clone for Subscription<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Subscription {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> Subscription<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) async fn new(
        engine: Engine<T>,
        key: Key,
        fetcher: Option<Arc<dyn Fetcher<T>>>,
        config: Config<T>,
    ) -> Self {
        let slot = Arc::new(StateSlot::new());
        let resolved = key.resolve();
        slot.set_key(resolved.serialized());
        slot.set_validating(resolved.is_active());

        let id = if resolved.is_active() {
            Some(
                engine
                    .subscribers
                    .register(resolved.serialized(), Arc::clone(&slot), config.ttl)
                    .await,
            )
        } else {
            None
        };

        Subscription {
            state: Arc::new(SubscriptionState {
                engine,
                config,
                fetcher,
                slot,
                current: RwLock::new(Registration { key: resolved, id }),
                unmounted: AtomicBool::new(false),
                poll_task: Mutex::new(None),
            }),
        }
    }

    /// Last known data for the tracked key.
    pub fn data(&self) -> Option<T> {
        self.state.slot.data()
    }

    /// Last revalidation error, cleared by the next success.
    pub fn error(&self) -> Option<FetchError> {
        self.state.slot.error()
    }

    /// Whether a refresh is currently in flight for this slot.
    pub fn is_validating(&self) -> bool {
        self.state.slot.is_validating()
    }

    /// Consistent snapshot of the slot.
    pub fn state(&self) -> Envelope<T> {
        self.state.slot.snapshot()
    }

    /// The consumer mounted: run an initial revalidation and start polling
    /// when a refresh interval is configured.
    pub async fn activate(&self) {
        Arc::clone(&self.state)
            .revalidate_with(RevalidateOptions::default())
            .await;
        Arc::clone(&self.state).start_polling();
    }

    /// The consumer is being torn down: stop polling, drop pending debounced
    /// work, and remove the slot from the registry. The data and in-flight
    /// caches are untouched; an outstanding fetch still completes for other
    /// watchers of the key.
    pub async fn deactivate(&self) {
        self.state.deactivate().await;
    }

    /// The consumer's key dependency changed: move the slot's registration
    /// to the new key and revalidate under it. Results of fetches still
    /// outstanding for the old key will bypass this slot from now on.
    pub async fn set_key(&self, key: Key) {
        Arc::clone(&self.state).set_key(key).await;
    }

    /// Focus/visibility event from the environment. Revalidates with retries
    /// suppressed; a no-op when `revalidate_on_focus` is off.
    pub async fn on_focus(&self) {
        if !self.state.config.revalidate_on_focus {
            return;
        }
        Arc::clone(&self.state)
            .revalidate_with(RevalidateOptions {
                should_retry_on_error: Some(false),
                ..RevalidateOptions::default()
            })
            .await;
    }

    /// Run one revalidation pass with default options.
    pub async fn revalidate(&self) {
        Arc::clone(&self.state)
            .revalidate_with(RevalidateOptions::default())
            .await;
    }

    /// Run one revalidation pass with explicit options.
    pub async fn revalidate_with(&self, opts: RevalidateOptions) {
        Arc::clone(&self.state).revalidate_with(opts).await;
    }

    /// Force a refresh past the deduping window and return the resulting
    /// state. This is the subscription-local write trigger.
    pub async fn force_revalidate(&self) -> Envelope<T> {
        Arc::clone(&self.state)
            .revalidate_with(RevalidateOptions {
                force_revalidate: Some(true),
                ..RevalidateOptions::default()
            })
            .await;
        self.state.slot.snapshot()
    }
}

pub(crate) struct SubscriptionState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    engine: Engine<T>,
    config: Config<T>,
    fetcher: Option<Arc<dyn Fetcher<T>>>,
    slot: Arc<StateSlot<T>>,
    current: RwLock<Registration>,
    unmounted: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl<T> SubscriptionState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// One pass of the revalidation decision sequence.
    pub(crate) async fn revalidate_with(self: Arc<Self>, opts: RevalidateOptions) {
        let is_first_fetch = self.slot.data().is_none();
        let resolved = self.current.read().key.clone();
        if !resolved.is_active() {
            self.slot.set_validating(false);
            return;
        }
        let key = resolved.serialized().to_string();

        // serve the cached state immediately, stale or not; the fetch
        // decision comes after
        let cached = self.engine.cache_get(&key).await;
        self.slot.set_validating(true);
        if let Some(entry) = &cached {
            self.slot.publish_cached(&entry.value);
        }

        let fetcher = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => {
                self.slot.set_validating(false);
                return;
            }
        };

        // the first fetch of a fresh slot proceeds even while hidden so a
        // newly mounted consumer is never left permanently empty
        if (!self.config.environment.is_document_visible() && !is_first_fetch)
            || opts.force_revalidate == Some(false)
        {
            trace!(key = %key, "revalidation gated off");
            self.slot.set_validating(false);
            return;
        }

        if let Some(entry) = &cached {
            let within_window = entry.age(Instant::now()) < self.config.deduping_interval;
            if within_window && opts.force_revalidate != Some(true) {
                trace!(key = %key, "inside deduping window; cache satisfies this pass");
                self.slot.set_validating(false);
                return;
            }
        }

        if cached.is_some() && !self.config.revalidate_debounce.is_zero() {
            let debounce = self.config.revalidate_debounce;
            tokio::spawn(async move {
                tokio::time::sleep(debounce).await;
                if !self.unmounted.load(Ordering::Acquire) {
                    self.trigger(resolved, fetcher, opts).await;
                }
            });
        } else {
            self.trigger(resolved, fetcher, opts).await;
        }
    }

    /// Fetch (or join the in-flight fetch), commit, and hand failures to the
    /// retry scheduler.
    async fn trigger(
        self: Arc<Self>,
        resolved: ResolvedKey,
        fetcher: Arc<dyn Fetcher<T>>,
        opts: RevalidateOptions,
    ) {
        let key = resolved.serialized().to_string();

        let fetch = match self.engine.inflight.get(&key).await {
            Some(existing) => {
                trace!(key = %key, "joining in-flight fetch");
                existing
            }
            None => {
                let fetch = fetcher.fetch(resolved.args().to_vec()).shared();
                self.engine
                    .inflight
                    .insert(&key, fetch.clone(), self.config.deduping_interval)
                    .await;
                fetch
            }
        };

        let result = fetch.await;
        self.engine
            .commit(
                &key,
                result,
                self.config.ttl,
                true,
                self.config.compare.clone(),
            )
            .await;
        self.slot.set_validating(false);
        self.engine.inflight.remove(&key).await;

        if self.slot.error().is_some() {
            let should_retry = !self.unmounted.load(Ordering::Acquire)
                && self.config.should_retry_on_error
                && opts.should_retry_on_error.unwrap_or(true);
            if should_retry {
                let attempt = opts.error_retry_count.unwrap_or(1);
                let config = self.config.clone();
                schedule_retry(self, attempt, &config);
            }
        }
    }

    async fn deactivate(&self) {
        self.unmounted.store(true, Ordering::Release);
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
        let (key, id) = {
            let registration = self.current.read();
            (registration.key.serialized().to_string(), registration.id)
        };
        if let Some(id) = id {
            self.engine.subscribers.unregister(&key, id).await;
        }
    }

    async fn set_key(self: Arc<Self>, key: Key) {
        let resolved = key.resolve();
        let (old_key, old_id) = {
            let mut registration = self.current.write();
            let old = (
                registration.key.serialized().to_string(),
                registration.id.take(),
            );
            registration.key = resolved.clone();
            old
        };
        if let Some(id) = old_id {
            self.engine.subscribers.unregister(&old_key, id).await;
        }

        self.slot.set_key(resolved.serialized());
        self.slot.set_validating(resolved.is_active());

        if resolved.is_active() {
            let id = self
                .engine
                .subscribers
                .register(
                    resolved.serialized(),
                    Arc::clone(&self.slot),
                    self.config.ttl,
                )
                .await;
            self.current.write().id = Some(id);
            if !self.unmounted.load(Ordering::Acquire) {
                self.revalidate_with(RevalidateOptions::default()).await;
            }
        }
    }

    fn start_polling(self: Arc<Self>) {
        if self.config.refresh_interval.is_zero() {
            return;
        }
        let interval = self.config.refresh_interval;
        let state = Arc::clone(&self);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if state.unmounted.load(Ordering::Acquire) {
                    break;
                }
                // errored rounds leave recovery to the retry path; offline
                // rounds skip the fetch entirely
                if state.slot.error().is_none() && state.config.environment.is_online() {
                    Arc::clone(&state)
                        .revalidate_with(RevalidateOptions::default())
                        .await;
                }
            }
        });
        let mut poll_task = self.poll_task.lock();
        if let Some(old) = poll_task.replace(task) {
            old.abort();
        }
    }
}
