//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use async_trait::async_trait;
use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Port for obtaining current time.
///
/// This abstraction allows the application layer to work with time
/// without depending on system clock implementation details.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Get the current instant.
    fn now(&self) -> Instant;
}

/// Port for concurrent key-value storage.
///
/// Every call on a single key must be atomic with respect to other calls on
/// that key. Infrastructure provides a sharded implementation (ShardedStorage).
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Access an entry with mutable access, creating it if necessary.
    ///
    /// # Arguments
    /// * `key` - The key to look up
    /// * `factory` - Function to create a new value if the key doesn't exist
    /// * `accessor` - Function that gets mutable access to the value
    ///
    /// # Returns
    /// The result from the accessor function
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R;

    /// Read an existing entry without creating or mutating it.
    fn with_entry<Q, F, R>(&self, key: &Q, accessor: F) -> Option<R>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> R;

    /// Get the number of entries in the storage.
    fn len(&self) -> usize;

    /// Check if the storage is empty.
    fn is_empty(&self) -> bool;

    /// Clear all entries from the storage.
    fn clear(&self);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Failure talking to a cache backend.
///
/// The orchestrator never surfaces these: a read fault is a miss and a
/// write fault is a skipped write.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend could not be reached
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    /// The backend rejected or failed the operation
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Port for a TTL-keyed cache of serialized values.
///
/// Values are opaque text (JSON in practice). Adapters handle their own
/// internal consistency; callers coordinate nothing.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Look up a value. `Ok(None)` is an explicit miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}
