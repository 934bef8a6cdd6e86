//! In-process TTL cache.
//!
//! Expiry is checked lazily on read against the injected clock; call
//! [`MemoryCache::purge_expired`] periodically to reclaim memory from keys
//! that are never read again. A TTL too large to express as an instant keeps
//! the entry until it is overwritten or removed.

use crate::application::ports::{CacheError, CacheStore, Clock};
use crate::infrastructure::clock::SystemClock;
use ahash::RandomState;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| expires_at > now)
    }
}

/// TTL cache held in a sharded map.
///
/// Cloning shares the entries.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<DashMap<String, CachedValue, RandomState>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a cache whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::with_hasher(RandomState::new())),
            clock,
        }
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, cached| cached.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        if let Some(cached) = self.entries.get(key) {
            if cached.is_live(now) {
                return Ok(Some(cached.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, cached| !cached.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            // Already expired; make sure no older value outlives it.
            self.entries.remove(key);
            return Ok(());
        }
        let expires_at = self.clock.now().checked_add(ttl);
        self.entries
            .insert(key.to_string(), CachedValue { value, expires_at });
        Ok(())
    }
}
