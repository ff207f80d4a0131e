//! Bounded retry scheduling after failed revalidations.

use std::sync::Arc;

use tracing::debug;

use crate::config::{Config, RevalidateOptions};
use crate::revalidate::SubscriptionState;

/// Schedule attempt `attempt` (1-based) of the retry sequence.
///
/// The delay grows linearly, `min(attempt, error_retry_count) *
/// error_retry_interval`, and retries stop once the attempt number exceeds
/// the configured count. Nothing is scheduled while the document is hidden;
/// the retried revalidation forces its way past the deduping window.
pub(crate) fn schedule_retry<T>(
    state: Arc<SubscriptionState<T>>,
    attempt: u32,
    config: &Config<T>,
) where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    if !config.environment.is_document_visible() {
        return;
    }
    if attempt > config.error_retry_count {
        debug!(attempt, "retry budget exhausted");
        return;
    }

    let count = attempt.min(config.error_retry_count);
    let delay = config.error_retry_interval * count;
    debug!(
        attempt,
        delay_ms = delay.as_millis() as u64,
        "scheduling retry"
    );

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        state
            .revalidate_with(RevalidateOptions {
                force_revalidate: Some(true),
                should_retry_on_error: Some(true),
                error_retry_count: Some(count + 1),
            })
            .await;
    });
}
