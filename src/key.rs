//! Key normalization.
//!
//! Every resource is identified by a [`Key`], which may be a literal string,
//! an ordered list of arguments, or a deferred computation. All of them
//! collapse to a single serialized string identity that the caches and the
//! subscriber registry agree on. The empty string is the inactive key: no
//! fetch, no cache hit, no fan-out.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::EngineError;

/// A deferred key computation. Returning `Err` means a dependency is not
/// ready yet and the key resolves to inactive.
pub type KeyFn = Arc<dyn Fn() -> Result<Key, EngineError> + Send + Sync>;

/// A logical resource identity.
#[derive(Clone)]
pub enum Key {
    /// A literal string key. The empty string is inactive.
    Literal(String),
    /// An ordered argument list, hashed into one string for cache identity.
    /// The fetcher receives the original elements, never the hash.
    Args(Vec<Value>),
    /// Never fetch, never hit the cache.
    Inactive,
    /// Evaluated lazily on every resolution; must yield a concrete key.
    Computed(KeyFn),
}

impl Key {
    /// Build a literal key.
    pub fn literal(key: impl Into<String>) -> Self {
        Key::Literal(key.into())
    }

    /// Build an argument-list key.
    pub fn args(args: impl IntoIterator<Item = Value>) -> Self {
        Key::Args(args.into_iter().collect())
    }

    /// Build a computed key.
    pub fn computed(f: impl Fn() -> Result<Key, EngineError> + Send + Sync + 'static) -> Self {
        Key::Computed(Arc::new(f))
    }

    /// Resolve to the serialized identity plus the original fetcher arguments.
    pub fn resolve(&self) -> ResolvedKey {
        match self {
            Key::Inactive => ResolvedKey::inactive(),
            Key::Literal(key) if key.is_empty() => ResolvedKey::inactive(),
            Key::Literal(key) => ResolvedKey {
                serialized: key.clone(),
                args: vec![Value::String(key.clone())],
            },
            Key::Args(args) => {
                let serialized = hash_args(args);
                if serialized.is_empty() {
                    ResolvedKey::inactive()
                } else {
                    ResolvedKey {
                        serialized,
                        args: args.clone(),
                    }
                }
            }
            Key::Computed(f) => match f.as_ref()() {
                // a computed key must yield a concrete key
                Ok(Key::Computed(_)) => ResolvedKey::inactive(),
                Ok(key) => key.resolve(),
                Err(err) => {
                    debug!(error = %err, "key dependency not ready");
                    ResolvedKey::inactive()
                }
            },
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Literal(key) => f.debug_tuple("Literal").field(key).finish(),
            Key::Args(args) => f.debug_tuple("Args").field(args).finish(),
            Key::Inactive => f.write_str("Inactive"),
            Key::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Literal(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Literal(key)
    }
}

/// A resolved key: the serialized cache identity and the original, unhashed
/// arguments handed to the fetcher.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    serialized: String,
    args: Vec<Value>,
}

impl ResolvedKey {
    pub(crate) fn inactive() -> Self {
        ResolvedKey {
            serialized: String::new(),
            args: Vec::new(),
        }
    }

    /// The string identity used by every cache and registry.
    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    /// The positional arguments the fetcher is invoked with.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// An inactive key never fetches and never hits the cache.
    pub fn is_active(&self) -> bool {
        !self.serialized.is_empty()
    }
}

/// Stable hash of an argument list covering value and shape: strings
/// serialize quoted, so `["a", {"x": 1}]` cannot collide with a
/// stringly-typed rendering of the same object. An empty list hashes to the
/// inactive key.
fn hash_args(args: &[Value]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let mut key = String::from("arg");
    for arg in args {
        key.push('@');
        key.push_str(&arg.to_string());
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_key_resolves_to_itself() {
        let resolved = Key::literal("user:1").resolve();
        assert!(resolved.is_active());
        assert_eq!(resolved.serialized(), "user:1");
        assert_eq!(resolved.args(), &[json!("user:1")]);
    }

    #[test]
    fn test_empty_and_inactive_keys_collapse() {
        assert!(!Key::literal("").resolve().is_active());
        assert!(!Key::Inactive.resolve().is_active());
        assert!(!Key::args([]).resolve().is_active());
    }

    #[test]
    fn test_args_hash_is_stable_and_order_sensitive() {
        let a = Key::args([json!("user"), json!(1)]).resolve();
        let b = Key::args([json!("user"), json!(1)]).resolve();
        let c = Key::args([json!(1), json!("user")]).resolve();
        assert_eq!(a.serialized(), b.serialized());
        assert_ne!(a.serialized(), c.serialized());
    }

    #[test]
    fn test_args_hash_distinguishes_shape() {
        // an object argument and its string rendering must not collide
        let object = Key::args([json!("a"), json!({"x": 1})]).resolve();
        let stringly = Key::args([json!("a"), json!("{\"x\":1}")]).resolve();
        assert_ne!(object.serialized(), stringly.serialized());
    }

    #[test]
    fn test_args_key_keeps_original_arguments() {
        let resolved = Key::args([json!("user"), json!({"x": 1})]).resolve();
        assert_eq!(resolved.args(), &[json!("user"), json!({"x": 1})]);
        assert!(resolved.serialized().starts_with("arg@"));
    }

    #[test]
    fn test_computed_key_resolves_inner_key() {
        let key = Key::computed(|| Ok(Key::literal("session:9")));
        assert_eq!(key.resolve().serialized(), "session:9");
    }

    #[test]
    fn test_failing_computed_key_is_inactive() {
        let key = Key::computed(|| Err(EngineError::key_resolution("user id not loaded")));
        assert!(!key.resolve().is_active());
    }

    #[test]
    fn test_nested_computed_key_is_inactive() {
        let key = Key::computed(|| Ok(Key::computed(|| Ok(Key::literal("never")))));
        assert!(!key.resolve().is_active());
    }
}
