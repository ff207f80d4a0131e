use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::error::FetchError;

/// Loads a resource from origin.
///
/// The fetcher receives the resolved, unhashed key arguments: a literal key
/// arrives as a single-element list containing itself, an argument-list key
/// arrives as its original elements. Implemented for any matching closure.
pub trait Fetcher<T>: Send + Sync {
    fn fetch(&self, args: Vec<Value>) -> BoxFuture<'static, Result<T, FetchError>>;
}

impl<T, F, Fut> Fetcher<T> for F
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    fn fetch(&self, args: Vec<Value>) -> BoxFuture<'static, Result<T, FetchError>> {
        (self)(args).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_closure_fetcher_receives_args() {
        let fetcher: Arc<dyn Fetcher<String>> = Arc::new(|args: Vec<Value>| async move {
            Ok(format!("fetched:{}", args[0].as_str().unwrap_or("?")))
        });
        let result = fetcher.fetch(vec![json!("user:1")]).await.unwrap();
        assert_eq!(result, "fetched:user:1");
    }
}
