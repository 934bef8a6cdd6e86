//! # fetch-throttle
//!
//! Per-key token bucket admission and cache-coordinated fetch fan-out for
//! services that sit in front of slow or rate-sensitive upstreams.
//!
//! The crate has two halves that are used independently:
//!
//! - [`RateLimiter`] decides, per caller key, whether a request may proceed.
//!   Each key gets its own token bucket, created full on first sight and
//!   forgotten after it has been idle for the expiration window.
//! - [`FetchOrchestrator`] resolves named units of work through a TTL cache.
//!   Misses run the unit's producer, concurrent misses on one cache key share
//!   a single execution, and batches are fanned out with a parallelism cap.
//!
//! ## Admission
//!
//! ```rust
//! use fetch_throttle::{LimiterConfig, RateLimiter};
//!
//! // 5 requests/sec per address, bursts of 10
//! let limiter = RateLimiter::new(LimiterConfig::ip()).unwrap();
//!
//! for _ in 0..10 {
//!     assert!(limiter.allow("203.0.113.7"));
//! }
//! assert!(!limiter.allow("203.0.113.7"));
//!
//! // Other keys are unaffected
//! assert!(limiter.allow("198.51.100.1"));
//! ```
//!
//! Keys are whatever the host decides. To derive them from a request type,
//! wrap the limiter in a [`KeyedLimiter`]:
//!
//! ```rust
//! use fetch_throttle::{composite_key, KeyedLimiter, LimiterConfig, RateLimiter};
//!
//! struct Request {
//!     ip: String,
//!     sector: String,
//! }
//!
//! let limiter = RateLimiter::new(LimiterConfig::sector_api()).unwrap();
//! let per_sector = KeyedLimiter::new(limiter, |r: &Request| composite_key(&r.ip, &r.sector));
//!
//! let request = Request { ip: "10.0.0.1".into(), sector: "energy".into() };
//! assert!(per_sector.allow_request(&request));
//! ```
//!
//! Idle buckets are only reclaimed while the eviction sweeper runs. Start it
//! from inside a tokio runtime and stop it on shutdown:
//!
//! ```rust,no_run
//! # use fetch_throttle::{LimiterConfig, RateLimiter};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new(LimiterConfig::default())?;
//! limiter.start()?;
//! // ...
//! limiter.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Fetching
//!
//! ```rust,no_run
//! use fetch_throttle::{FetchOrchestrator, FetchTask, MemoryCache, OrchestratorConfig};
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator =
//!     FetchOrchestrator::new(Arc::new(MemoryCache::new()), OrchestratorConfig::default())?;
//!
//! let tasks = ["stocks", "bonds", "energy"].map(|name| {
//!     FetchTask::new(name, format!("quotes:{name}"), Duration::from_secs(300), move || async move {
//!         // call the upstream here
//!         Ok::<_, anyhow::Error>(format!("{name} quotes"))
//!     })
//! });
//!
//! let quotes = orchestrator.fetch_all(tasks, &CancellationToken::new()).await?;
//! assert_eq!(quotes.len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! `fetch_all` is all-or-nothing: any failure returns that one error and no
//! values. Use [`FetchOrchestrator::fetch_all_settled`] to keep the values
//! that did succeed.
//!
//! ## Failure handling
//!
//! - Admission checks never fail.
//! - Cache faults never fail a task: a failed or undecodable read is a miss,
//!   a failed write is logged and dropped.
//! - Producer errors, timeouts, cancellations and panics come back as
//!   [`FetchError`], always naming the task.
//! - Invalid configuration is rejected by constructors with [`ConfigError`].
//!
//! ## Logging
//!
//! The crate emits `tracing` events (denials and cache outcomes at `debug`,
//! sweeper lifecycle at `info`, cache faults and timeouts at `warn`) and never
//! installs a subscriber.
//!
//! ## Feature flags
//!
//! - `redis-cache`: [`RedisCache`], a [`CacheStore`] shared across processes.
//! - `test-helpers`: exposes `infrastructure::mocks` (`MockClock`,
//!   `FaultInjectingCache`) to downstream tests.

// Domain layer - pure data and math
pub mod domain;

// Application layer - coordination
pub mod application;

// Infrastructure layer - adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    bucket::{TokenBucket, TrackerStats},
    config::{ConfigError, LimiterConfig},
    task::{BatchReport, FetchError, FetchTask, DEFAULT_TARGET},
};

pub use application::{
    limiter::{composite_key, KeyedLimiter, RateLimiter},
    metrics::{
        FetchMetrics, FetchMetricsSnapshot, LimiterMetrics, LimiterMetricsSnapshot, TaskCacheStats,
    },
    orchestrator::{FetchOrchestrator, OrchestratorConfig},
    politeness::PolitenessConfig,
    ports::{CacheError, CacheStore, Clock, Storage},
    sweeper::{ShutdownError, StartError},
};

pub use infrastructure::{clock::SystemClock, memory_cache::MemoryCache, storage::ShardedStorage};

#[cfg(feature = "redis-cache")]
pub use infrastructure::redis_cache::{RedisCache, RedisCacheConfig};
