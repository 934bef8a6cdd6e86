//! Registry of per-key token buckets.
//!
//! The registry owns the `key -> TokenBucket` map and the clock used to
//! timestamp every access. It knows nothing about namespaces or metrics;
//! those belong to the limiter in front of it.

use crate::application::ports::{Clock, Storage};
use crate::domain::bucket::TokenBucket;
use crate::domain::config::LimiterConfig;
use std::sync::Arc;
use std::time::Instant;

/// Registry holding one bucket per observed key.
///
/// Generic over the storage implementation; production code uses
/// `Arc<ShardedStorage<String, TokenBucket>>`. Cloning is cheap and every
/// clone sees the same buckets.
#[derive(Clone)]
pub struct TrackerRegistry<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    storage: S,
    clock: Arc<dyn Clock>,
    config: LimiterConfig,
}

impl<S> TrackerRegistry<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    /// Create a registry. `config` is assumed to be validated.
    pub fn new(storage: S, clock: Arc<dyn Clock>, config: LimiterConfig) -> Self {
        Self {
            storage,
            clock,
            config,
        }
    }

    /// Run `f` against the bucket for `key`, creating a full one if absent.
    ///
    /// The callback runs under the key's shard lock and receives the instant
    /// read for this access.
    pub fn with_tracker<F, R>(&self, key: String, f: F) -> R
    where
        F: FnOnce(&mut TokenBucket, Instant) -> R,
    {
        let now = self.clock.now();
        let (rate, burst) = (self.config.rate, self.config.burst);
        self.storage.with_entry_mut(
            key,
            || TokenBucket::new(rate, burst, now),
            |bucket| f(bucket, now),
        )
    }

    /// Read the bucket for `key` without creating it.
    pub fn inspect<F, R>(&self, key: &str, f: F) -> Option<R>
    where
        F: FnOnce(&TokenBucket) -> R,
    {
        self.storage.with_entry(key, f)
    }

    /// Drop every bucket idle for longer than the expiration window.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let expiration = self.config.expiration;
        let mut evicted = 0;
        self.storage.retain(|_, bucket| {
            let keep = !bucket.is_idle(now, expiration);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Forget every key.
    pub fn clear(&self) {
        self.storage.clear();
    }
}

impl<S> std::fmt::Debug for TrackerRegistry<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerRegistry")
            .field("tracked", &self.storage.len())
            .field("config", &self.config)
            .finish()
    }
}
