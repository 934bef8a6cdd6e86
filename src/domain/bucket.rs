//! Continuous-refill token bucket tracked per key.
//!
//! A bucket starts full, refills at `rate` tokens per second up to `burst`,
//! and spends one token per admitted request. All methods take the current
//! instant explicitly so the math stays deterministic under a mock clock.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Rate state for a single key.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    rate: f64,
    burst: u32,
    last_refill: Instant,
    last_seen: Instant,
    total_requests: u64,
    rejected_requests: u64,
}

impl TokenBucket {
    /// Create a full bucket.
    ///
    /// `rate` is expected to be validated by the caller
    /// (see [`LimiterConfig::validate`](crate::LimiterConfig::validate)).
    pub fn new(rate: f64, burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            rate,
            burst,
            last_refill: now,
            last_seen: now,
            total_requests: 0,
            rejected_requests: 0,
        }
    }

    /// Recompute the token level for the time elapsed since the last refill.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(f64::from(self.burst));
        // A clock that steps backwards must not rewind the refill point.
        self.last_refill = self.last_refill.max(now);
    }

    /// Refill, then spend one token if at least one is available.
    ///
    /// Every call counts as activity for eviction purposes, admitted or not.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_seen = self.last_seen.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.total_requests += 1;
            true
        } else {
            self.rejected_requests += 1;
            false
        }
    }

    /// Whether the bucket has seen no checks for longer than `expiration`.
    pub fn is_idle(&self, now: Instant, expiration: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > expiration
    }

    /// Time until one token is available, assuming no other consumers.
    ///
    /// Waits longer than a `Duration` can hold saturate to `Duration::MAX`.
    pub fn time_until_available(&self, now: Instant) -> Option<Duration> {
        if self.burst == 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let level = (self.tokens + elapsed * self.rate).min(f64::from(self.burst));
        if level >= 1.0 {
            Some(Duration::ZERO)
        } else {
            let wait = (1.0 - level) / self.rate;
            Some(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
        }
    }

    /// Read-only snapshot. Does not refill.
    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            tokens_remaining: self.tokens,
            total_requests: self.total_requests,
            rejected_requests: self.rejected_requests,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn burst(&self) -> u32 {
        self.burst
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

/// Observability snapshot of one key's bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrackerStats {
    /// Token level as of the last admission check
    pub tokens_remaining: f64,
    /// Admitted requests since the bucket was created
    pub total_requests: u64,
    /// Denied requests since the bucket was created
    pub rejected_requests: u64,
}
