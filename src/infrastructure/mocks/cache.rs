//! Cache double with switchable failures.

use crate::application::ports::{CacheError, CacheStore, Clock};
use crate::infrastructure::memory_cache::MemoryCache;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory cache that can be told to fail reads or writes.
///
/// Clones share entries, switches and counters, so a test can keep one
/// clone while the orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct FaultInjectingCache {
    inner: MemoryCache,
    state: Arc<FaultState>,
}

#[derive(Debug, Default)]
struct FaultState {
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl FaultInjectingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryCache::with_clock(clock),
            state: Arc::default(),
        }
    }

    /// Make every `get` fail until switched off.
    pub fn fail_reads(&self, fail: bool) {
        self.state.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every `set` fail until switched off.
    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Store a raw value directly, bypassing fault switches.
    pub async fn seed(&self, key: &str, raw: impl Into<String>, ttl: Duration) {
        // MemoryCache::set cannot fail
        let _ = self.inner.set(key, raw.into(), ttl).await;
    }

    /// Read a raw value directly, bypassing fault switches.
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.ok().flatten()
    }

    /// `get` calls received, failed or not.
    pub fn reads(&self) -> u64 {
        self.state.reads.load(Ordering::SeqCst)
    }

    /// `set` calls received, failed or not.
    pub fn writes(&self) -> u64 {
        self.state.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CacheStore for FaultInjectingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.state.reads.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected read fault".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.state.writes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Backend("injected write fault".to_string()));
        }
        self.inner.set(key, value, ttl).await
    }
}
