use std::fmt;
use std::sync::Arc;

/// Error type for engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// A cache store operation failed.
    #[error("[{store}] cache error for key '{key}': {message}")]
    Store {
        store: String,
        key: String,
        message: String,
    },
    /// A computed key could not be resolved.
    #[error("key resolution failed: {0}")]
    KeyResolution(String),
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Create a new store operation error.
    pub fn store(
        store: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        EngineError::Store {
            store: store.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new key resolution error.
    pub fn key_resolution(message: impl Into<String>) -> Self {
        EngineError::KeyResolution(message.into())
    }
}

/// A fetcher failure, cheaply cloneable so one error instance can be stored in
/// the data cache and fanned out to every subscriber of the key.
#[derive(Clone)]
pub struct FetchError(Arc<dyn std::error::Error + Send + Sync>);

impl FetchError {
    /// Wrap an arbitrary error.
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        FetchError(Arc::new(err))
    }

    /// Create an error from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        FetchError(Arc::new(Message(message.into())))
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let source: &(dyn std::error::Error + 'static) = &*self.0;
        Some(source)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);
