//! Application layer - coordination on top of the domain types.
//!
//! - Tracker registry and the per-key rate limiter, with its eviction sweeper
//! - Fetch orchestrator with single-flight deduplication and politeness gates
//! - Observability counters
//!
//! ## Ports
//!
//! The traits in [`ports`] are what infrastructure adapters implement. The
//! coordination logic only talks to those traits; the one exception is
//! [`RateLimiter::new`](limiter::RateLimiter::new), which wires in
//! `SystemClock` and `ShardedStorage` as defaults.

pub mod flight;
pub mod limiter;
pub mod metrics;
pub mod orchestrator;
pub mod politeness;
pub mod ports;
pub mod registry;
pub mod sweeper;
