//! Per-key admission decisions.
//!
//! A [`RateLimiter`] answers "may this key proceed right now?" against one
//! token bucket profile. It owns its trackers and its sweeper; there is no
//! process-wide instance. Hosts that need several profiles build several
//! limiters, each with its own namespace.

use crate::application::metrics::LimiterMetrics;
use crate::application::ports::{Clock, Storage};
use crate::application::registry::TrackerRegistry;
use crate::application::sweeper::{
    sweep_idle, EvictionSweeper, ShutdownError, StartError, SweeperHandle,
};
use crate::domain::bucket::{TokenBucket, TrackerStats};
use crate::domain::config::{ConfigError, LimiterConfig};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::storage::ShardedStorage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Storage used by limiters built with [`RateLimiter::new`].
pub type DefaultStorage = Arc<ShardedStorage<String, TokenBucket>>;

/// Token bucket admission over many independent keys.
///
/// Clones share trackers, metrics and the sweeper.
pub struct RateLimiter<S = DefaultStorage>
where
    S: Storage<String, TokenBucket> + Clone,
{
    registry: TrackerRegistry<S>,
    metrics: LimiterMetrics,
    sweeper: Arc<Mutex<Option<SweeperHandle>>>,
}

impl RateLimiter<DefaultStorage> {
    /// Create a limiter on the system clock.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub fn new(config: LimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a limiter on an injected clock.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        Self::with_storage(config, Arc::new(ShardedStorage::new()), clock)
    }
}

impl<S> RateLimiter<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    /// Create a limiter over caller-provided storage.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub fn with_storage(
        config: LimiterConfig,
        storage: S,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            registry: TrackerRegistry::new(storage, clock, config),
            metrics: LimiterMetrics::new(),
            sweeper: Arc::new(Mutex::new(None)),
        })
    }

    /// Decide whether `key` may proceed, spending a token if so.
    ///
    /// Unknown keys get a full bucket. Refill and spend happen under the
    /// key's shard lock, so concurrent checks on one key never over-admit.
    /// This never fails and never waits beyond that lock.
    pub fn allow(&self, key: &str) -> bool {
        let scoped = self.registry.config().scoped_key(key).into_owned();
        let admitted = self
            .registry
            .with_tracker(scoped, |bucket, now| bucket.try_acquire(now));

        if admitted {
            self.metrics.record_allowed();
        } else {
            self.metrics.record_denied();
            debug!(key, "rate limit exceeded");
        }
        admitted
    }

    /// Current state of `key`'s bucket, `None` if it is not tracked.
    ///
    /// Read-only: no refill happens and no bucket is created, so repeated
    /// calls return the same value.
    pub fn stats(&self, key: &str) -> Option<TrackerStats> {
        let scoped = self.registry.config().scoped_key(key);
        self.registry.inspect(&scoped, TokenBucket::stats)
    }

    /// How long until `key` would be admitted.
    ///
    /// Untracked keys return zero. `None` means never (zero burst).
    pub fn time_until_allowed(&self, key: &str) -> Option<Duration> {
        let scoped = self.registry.config().scoped_key(key);
        let now = self.registry.clock().now();
        self.registry
            .inspect(&scoped, |bucket| bucket.time_until_available(now))
            .unwrap_or_else(|| (self.registry.config().burst > 0).then_some(Duration::ZERO))
    }

    /// Evict idle trackers now, outside the sweeper schedule.
    ///
    /// Returns the number of trackers removed.
    pub fn sweep(&self) -> usize {
        sweep_idle(&self.registry, &self.metrics)
    }

    /// Number of keys currently tracked.
    pub fn tracker_count(&self) -> usize {
        self.registry.len()
    }

    /// Forget every key. Each one starts over with a full bucket.
    pub fn reset(&self) {
        self.registry.clear();
    }

    pub fn metrics(&self) -> &LimiterMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &LimiterConfig {
        self.registry.config()
    }

    /// Whether the background sweeper is running.
    pub fn is_running(&self) -> bool {
        matches!(&*self.sweeper.lock(), Some(handle) if !handle.is_finished())
    }
}

impl<S> RateLimiter<S>
where
    S: Storage<String, TokenBucket> + Clone + 'static,
{
    /// Start the background sweeper on the current tokio runtime.
    ///
    /// It runs once per expiration window until [`RateLimiter::stop`] is
    /// called or the last clone of this limiter is dropped.
    ///
    /// # Errors
    /// `StartError::AlreadyRunning` if a sweeper is active,
    /// `StartError::NoRuntime` outside a runtime.
    pub fn start(&self) -> Result<(), StartError> {
        let mut slot = self.sweeper.lock();
        if matches!(&*slot, Some(handle) if !handle.is_finished()) {
            return Err(StartError::AlreadyRunning);
        }
        let handle = EvictionSweeper::new(self.registry.clone(), self.metrics.clone()).spawn()?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the background sweeper and wait for it to exit.
    ///
    /// Stopping a limiter that is not running is a no-op.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the sweeper task panicked.
    pub async fn stop(&self) -> Result<(), ShutdownError> {
        // Release the lock before awaiting
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await?;
        }
        Ok(())
    }
}

impl<S> Clone for RateLimiter<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

impl<S> fmt::Debug for RateLimiter<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("registry", &self.registry)
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

/// Build the key for a per-identity, per-category limit.
///
/// An empty category means "every category" and maps to `all`.
pub fn composite_key(identity: &str, category: &str) -> String {
    let category = if category.is_empty() { "all" } else { category };
    format!("{identity}:{category}")
}

/// A limiter paired with the rule that turns a request into its key.
///
/// The key rule is a pure function fixed at construction, so callers never
/// see or build keys themselves.
pub struct KeyedLimiter<R: ?Sized, S = DefaultStorage>
where
    S: Storage<String, TokenBucket> + Clone,
{
    limiter: RateLimiter<S>,
    key_fn: Arc<dyn Fn(&R) -> String + Send + Sync>,
}

impl<R: ?Sized, S> KeyedLimiter<R, S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    pub fn new<F>(limiter: RateLimiter<S>, key_fn: F) -> Self
    where
        F: Fn(&R) -> String + Send + Sync + 'static,
    {
        Self {
            limiter,
            key_fn: Arc::new(key_fn),
        }
    }

    /// Admission check for the key derived from `request`.
    pub fn allow_request(&self, request: &R) -> bool {
        self.limiter.allow(&(self.key_fn)(request))
    }

    /// Bucket state for the key derived from `request`.
    pub fn stats_for(&self, request: &R) -> Option<TrackerStats> {
        self.limiter.stats(&(self.key_fn)(request))
    }

    /// The key `request` maps to.
    pub fn key_for(&self, request: &R) -> String {
        (self.key_fn)(request)
    }

    pub fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }
}

impl<R: ?Sized, S> Clone for KeyedLimiter<R, S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            key_fn: Arc::clone(&self.key_fn),
        }
    }
}

impl<R: ?Sized, S> fmt::Debug for KeyedLimiter<R, S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedLimiter")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    fn limiter(rate: f64, burst: u32) -> (RateLimiter, Arc<MockClock>) {
        let clock = Arc::new(MockClock::starting_now());
        let config = LimiterConfig::new(rate, burst, Duration::from_secs(60)).unwrap();
        let limiter = RateLimiter::with_clock(config, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = LimiterConfig {
            rate: 0.0,
            ..LimiterConfig::default()
        };
        assert_eq!(
            RateLimiter::new(config).unwrap_err(),
            ConfigError::InvalidRate(0.0)
        );
    }

    #[test]
    fn test_allow_and_metrics() {
        let (limiter, _) = limiter(5.0, 3);

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        let snapshot = limiter.metrics().snapshot();
        assert_eq!(snapshot.allowed, 3);
        assert_eq!(snapshot.denied, 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _) = limiter(1.0, 1);

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.tracker_count(), 2);
    }

    #[test]
    fn test_stats_unknown_key() {
        let (limiter, _) = limiter(1.0, 1);
        assert_eq!(limiter.stats("ghost"), None);
        assert_eq!(limiter.tracker_count(), 0);
    }

    #[test]
    fn test_time_until_allowed() {
        let (limiter, clock) = limiter(4.0, 1);

        assert_eq!(limiter.time_until_allowed("k"), Some(Duration::ZERO));
        limiter.allow("k");
        assert_eq!(
            limiter.time_until_allowed("k"),
            Some(Duration::from_millis(250))
        );

        clock.advance(Duration::from_millis(250));
        assert_eq!(limiter.time_until_allowed("k"), Some(Duration::ZERO));

        let (blocked, _) = limiter_zero_burst();
        assert_eq!(blocked.time_until_allowed("k"), None);
    }

    fn limiter_zero_burst() -> (RateLimiter, Arc<MockClock>) {
        limiter(1.0, 0)
    }

    #[test]
    fn test_namespace_applied() {
        let clock = Arc::new(MockClock::starting_now());
        let storage: DefaultStorage = Arc::new(ShardedStorage::new());
        let ip = RateLimiter::with_storage(LimiterConfig::ip(), storage.clone(), clock.clone())
            .unwrap();
        let api = RateLimiter::with_storage(LimiterConfig::api(), storage.clone(), clock).unwrap();

        ip.allow("shared-key");
        api.allow("shared-key");

        assert_eq!(storage.len(), 2);
        assert!(storage.contains_key("ip:shared-key"));
        assert!(storage.contains_key("api:shared-key"));
    }

    #[test]
    fn test_composite_key() {
        assert_eq!(composite_key("10.0.0.1", "energy"), "10.0.0.1:energy");
        assert_eq!(composite_key("10.0.0.1", ""), "10.0.0.1:all");
    }

    #[test]
    fn test_keyed_limiter() {
        struct Request {
            ip: &'static str,
            sector: &'static str,
        }

        let (limiter, _) = limiter(1.0, 1);
        let keyed = KeyedLimiter::new(limiter, |r: &Request| composite_key(r.ip, r.sector));

        let tech = Request {
            ip: "1.1.1.1",
            sector: "tech",
        };
        let all = Request {
            ip: "1.1.1.1",
            sector: "",
        };

        assert_eq!(keyed.key_for(&all), "1.1.1.1:all");
        assert!(keyed.allow_request(&tech));
        assert!(!keyed.allow_request(&tech));
        assert!(keyed.allow_request(&all));
        assert_eq!(keyed.stats_for(&tech).unwrap().rejected_requests, 1);
    }

    #[test]
    fn test_start_outside_runtime() {
        let (limiter, _) = limiter(1.0, 1);
        assert!(matches!(limiter.start(), Err(StartError::NoRuntime(_))));
        assert!(!limiter.is_running());
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (limiter, _) = limiter(1.0, 1);

        limiter.start().unwrap();
        assert!(limiter.is_running());
        assert!(matches!(limiter.start(), Err(StartError::AlreadyRunning)));

        limiter.stop().await.unwrap();
        assert!(!limiter.is_running());

        // Stopping twice is fine, and the limiter can be restarted
        limiter.stop().await.unwrap();
        limiter.start().unwrap();
        limiter.stop().await.unwrap();
    }
}
