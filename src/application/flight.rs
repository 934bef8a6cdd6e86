//! Single-flight table keyed by cache key.
//!
//! Concurrent misses on one cache key share a single execution. The first
//! caller starts it on a spawned task; later callers clone its shared
//! future. The entry is removed when the execution ends, including by panic,
//! so the next miss after that starts fresh (and normally hits the cache).

use crate::domain::task::FetchError;
use ahash::RandomState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Serialized result shared by every waiter of one execution.
pub type FlightResult = Result<Arc<str>, FetchError>;

/// Future every waiter of one execution polls.
pub type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

struct Flight {
    id: u64,
    future: SharedFlight,
}

impl std::fmt::Debug for Flight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Executions currently in flight.
#[derive(Debug, Default)]
pub struct FlightTable {
    flights: DashMap<String, Flight, RandomState>,
    next_id: AtomicU64,
}

impl FlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the execution for `key`, or start one with `start`.
    ///
    /// Returns the shared future and whether this caller started it. When
    /// joining, `start` is dropped without being called. `task` names the
    /// starter in the error reported if the execution panics.
    pub fn join_or_start<F>(self: &Arc<Self>, key: &str, task: &str, start: F) -> (SharedFlight, bool)
    where
        F: FnOnce() -> BoxFuture<'static, FlightResult>,
    {
        if let Some(flight) = self.flights.get(key) {
            return (flight.future.clone(), false);
        }

        match self.flights.entry(key.to_string()) {
            Entry::Occupied(entry) => (entry.get().future.clone(), false),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let landing = Landing {
                    table: Arc::clone(self),
                    key: key.to_string(),
                    id,
                };
                let work = start();
                let handle = tokio::spawn(async move {
                    let _landing = landing;
                    work.await
                });

                let task = task.to_string();
                let future = async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(error) if error.is_panic() => Err(FetchError::Panicked { task }),
                        Err(_) => Err(FetchError::Cancelled { task }),
                    }
                }
                .boxed()
                .shared();

                entry.insert(Flight {
                    id,
                    future: future.clone(),
                });
                (future, true)
            }
        }
    }

    /// Number of executions in flight.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Removes a flight's entry when its execution ends.
///
/// Matching on `id` keeps a late landing from removing a newer flight that
/// reused the key.
struct Landing {
    table: Arc<FlightTable>,
    key: String,
    id: u64,
}

impl Drop for Landing {
    fn drop(&mut self) {
        let id = self.id;
        self.table
            .flights
            .remove_if(&self.key, |_, flight| flight.id == id);
    }
}
