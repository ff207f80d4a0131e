use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Environment probes the engine consults before fetching. The reactive
/// binding layer supplies a real implementation wired to its host; the
/// default reports always online and always visible.
pub trait Environment: Send + Sync {
    /// Whether the host currently has network connectivity.
    fn is_online(&self) -> bool {
        true
    }

    /// Whether the consumer surface is currently visible. Background
    /// revalidation and retries are suppressed while hidden; the very first
    /// fetch of a subscription still proceeds.
    fn is_document_visible(&self) -> bool {
        true
    }
}

/// Default environment: always online, always visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysVisible;

impl Environment for AlwaysVisible {}

/// Custom equality used to decide whether freshly fetched data should replace
/// the previous value. Returning `true` means "unchanged".
pub type CompareFn<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Per-subscription configuration, merged once at subscribe time.
pub struct Config<T> {
    /// Re-run revalidation on this fixed interval while active. Zero
    /// disables polling.
    pub refresh_interval: Duration,

    /// Time-to-live for data cache entries. Zero means entries never expire.
    pub ttl: Duration,

    /// Window during which concurrent refreshes for one key collapse into a
    /// single fetch.
    pub deduping_interval: Duration,

    /// Revalidate when the environment reports a focus/visibility event.
    pub revalidate_on_focus: bool,

    /// Delay a stale-serving refresh by this amount, dropping it if the
    /// subscription is deactivated in the meantime. Zero disables.
    pub revalidate_debounce: Duration,

    /// Whether failed revalidations schedule retries.
    pub should_retry_on_error: bool,

    /// Base delay between retries; attempt `n` waits `n * error_retry_interval`.
    pub error_retry_interval: Duration,

    /// Retries stop after this many attempts.
    pub error_retry_count: u32,

    /// Custom equality for fetched data; defaults to `PartialEq`.
    pub compare: Option<CompareFn<T>>,

    /// Environment probes.
    pub environment: Arc<dyn Environment>,
}

impl<T> Default for Config<T> {
    fn default() -> Self {
        Config {
            refresh_interval: Duration::ZERO,
            ttl: Duration::ZERO,
            deduping_interval: Duration::from_millis(2000),
            revalidate_on_focus: true,
            revalidate_debounce: Duration::ZERO,
            should_retry_on_error: true,
            error_retry_interval: Duration::from_millis(5000),
            error_retry_count: 5,
            compare: None,
            environment: Arc::new(AlwaysVisible),
        }
    }
}

impl<T> Clone for Config<T> {
    fn clone(&self) -> Self {
        Config {
            refresh_interval: self.refresh_interval,
            ttl: self.ttl,
            deduping_interval: self.deduping_interval,
            revalidate_on_focus: self.revalidate_on_focus,
            revalidate_debounce: self.revalidate_debounce,
            should_retry_on_error: self.should_retry_on_error,
            error_retry_interval: self.error_retry_interval,
            error_retry_count: self.error_retry_count,
            compare: self.compare.clone(),
            environment: Arc::clone(&self.environment),
        }
    }
}

impl<T> Config<T> {
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn deduping_interval(mut self, interval: Duration) -> Self {
        self.deduping_interval = interval;
        self
    }

    pub fn revalidate_on_focus(mut self, enabled: bool) -> Self {
        self.revalidate_on_focus = enabled;
        self
    }

    pub fn revalidate_debounce(mut self, debounce: Duration) -> Self {
        self.revalidate_debounce = debounce;
        self
    }

    pub fn should_retry_on_error(mut self, enabled: bool) -> Self {
        self.should_retry_on_error = enabled;
        self
    }

    pub fn error_retry_interval(mut self, interval: Duration) -> Self {
        self.error_retry_interval = interval;
        self
    }

    pub fn error_retry_count(mut self, count: u32) -> Self {
        self.error_retry_count = count;
        self
    }

    pub fn compare(mut self, compare: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.compare = Some(Arc::new(compare));
        self
    }

    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = environment;
        self
    }
}

impl<T> fmt::Debug for Config<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("refresh_interval", &self.refresh_interval)
            .field("ttl", &self.ttl)
            .field("deduping_interval", &self.deduping_interval)
            .field("revalidate_on_focus", &self.revalidate_on_focus)
            .field("revalidate_debounce", &self.revalidate_debounce)
            .field("should_retry_on_error", &self.should_retry_on_error)
            .field("error_retry_interval", &self.error_retry_interval)
            .field("error_retry_count", &self.error_retry_count)
            .field("compare", &self.compare.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Per-call overrides threaded through one revalidation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevalidateOptions {
    /// `Some(true)` bypasses the deduping window; `Some(false)` skips the
    /// fetch entirely.
    pub force_revalidate: Option<bool>,

    /// Overrides the config's retry policy for this pass.
    pub should_retry_on_error: Option<bool>,

    /// The retry attempt this pass represents; absent for user triggers.
    pub error_retry_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config<String> = Config::default();
        assert_eq!(config.refresh_interval, Duration::ZERO);
        assert_eq!(config.ttl, Duration::ZERO);
        assert_eq!(config.deduping_interval, Duration::from_millis(2000));
        assert!(config.revalidate_on_focus);
        assert_eq!(config.revalidate_debounce, Duration::ZERO);
        assert!(config.should_retry_on_error);
        assert_eq!(config.error_retry_interval, Duration::from_millis(5000));
        assert_eq!(config.error_retry_count, 5);
        assert!(config.compare.is_none());
        assert!(config.environment.is_online());
        assert!(config.environment.is_document_visible());
    }

    #[test]
    fn test_builder_style_overrides() {
        let config: Config<u32> = Config::default()
            .refresh_interval(Duration::from_secs(30))
            .deduping_interval(Duration::from_millis(500))
            .should_retry_on_error(false)
            .compare(|a, b| a % 10 == b % 10);
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
        assert_eq!(config.deduping_interval, Duration::from_millis(500));
        assert!(!config.should_retry_on_error);
        assert!(config.compare.is_some());
    }
}
