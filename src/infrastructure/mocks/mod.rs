//! Test doubles for the infrastructure adapters.

pub mod cache;
pub mod clock;

pub use cache::FaultInjectingCache;
pub use clock::MockClock;
