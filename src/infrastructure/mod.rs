//! Infrastructure layer - adapters behind the application ports.
//!
//! This layer provides:
//! - Clock abstraction (system time vs mock)
//! - Sharded storage for token buckets
//! - TTL cache adapters (in-process, and Redis with the `redis-cache` feature)

pub mod clock;
pub mod memory_cache;
pub mod storage;

#[cfg(feature = "redis-cache")]
pub mod redis_cache;

/// Mock implementations for testing.
///
/// Only available with the `test-helpers` feature or in test builds. To use
/// them from integration tests:
/// ```toml
/// [dev-dependencies]
/// fetch-throttle = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
