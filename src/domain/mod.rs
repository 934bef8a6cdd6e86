//! Domain layer - pure data and math with no runtime dependencies.
//!
//! This layer contains the core concepts and invariants:
//! - Token bucket state and its refill arithmetic
//! - Limiter configuration profiles and their validation
//! - Fetch tasks, their errors and batch outcomes
//!
//! All types in this layer are pure and easily testable.

pub mod bucket;
pub mod config;
pub mod task;
