//! swr-engine - a stale-while-revalidate (SWR) data-coordination engine
//!
//! This library coordinates cached reads and background refreshes:
//! - Stale-while-revalidate semantics: serve the last known value
//!   immediately, refresh in the background
//! - Deduplication of concurrent fetches for the same key
//! - Fan-out of committed results to every subscriber of a key
//! - TTL eviction, retry with linear backoff, debounce, polling
//!
//! # Example
//!
//! ```ignore
//! use swr_engine::{Config, Engine, FetchError, Fetcher, Key};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine: Arc<Engine<String>> = Arc::new(Engine::new());
//!
//!     let fetcher: Arc<dyn Fetcher<String>> = Arc::new(|args: Vec<serde_json::Value>| async move {
//!         // load from the network - args carry the original key
//!         Ok::<_, FetchError>(format!("profile for {}", args[0]))
//!     });
//!
//!     let subscription = engine
//!         .subscribe(Key::literal("user:123"), Some(fetcher), Config::default())
//!         .await;
//!     subscription.activate().await;
//!
//!     println!("{:?}", subscription.data());
//!
//!     // any writer can push a value; every subscriber of the key sees it
//!     engine.mutate(&Key::literal("user:123"), "updated".into()).await;
//!
//!     subscription.deactivate().await;
//! }
//! ```

mod builder;
mod config;
mod dedupe;
mod engine;
mod entry;
mod error;
mod fetcher;
mod key;
mod retry;
mod revalidate;
mod store;
pub mod stores;
mod subscribers;

// Re-export public API
pub use builder::EngineBuilder;
pub use config::{AlwaysVisible, CompareFn, Config, Environment, RevalidateOptions};
pub use engine::Engine;
pub use entry::{CacheEntry, Envelope};
pub use error::{EngineError, FetchError};
pub use fetcher::Fetcher;
pub use key::{Key, KeyFn, ResolvedKey};
pub use revalidate::Subscription;
pub use store::CacheStore;
pub use stores::memory::ExpiringCache;
pub use stores::moka::{MokaStore, MokaStoreConfig};
pub use subscribers::{StateSlot, SubscriberId};
