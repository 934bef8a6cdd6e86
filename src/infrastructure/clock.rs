//! Clock adapters.
//!
//! `SystemClock` is what every limiter and cache uses unless a test injects
//! `MockClock` (see `crate::infrastructure::mocks`, available with the
//! `test-helpers` feature or in test builds).

use crate::application::ports::Clock;
use std::time::Instant;

/// Monotonic wall clock backed by `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
