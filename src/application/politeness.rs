//! Outbound pacing per target.
//!
//! Independent of the admission limiter: this shapes how hard the
//! orchestrator itself hits each upstream host. Every producer call first
//! takes a slot on its target's gate, then waits a fixed delay plus a random
//! jitter before it runs.

use crate::domain::config::ConfigError;
use ahash::RandomState;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Pacing applied to every target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolitenessConfig {
    /// Producer calls allowed in flight per target
    pub parallelism: usize,
    /// Fixed pause before each producer call
    pub delay: Duration,
    /// Upper bound of an extra uniform random pause
    pub random_delay: Duration,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            parallelism: 20,
            delay: Duration::from_millis(200),
            random_delay: Duration::ZERO,
        }
    }
}

impl PolitenessConfig {
    /// No pacing at all.
    pub fn none() -> Self {
        Self {
            parallelism: Semaphore::MAX_PERMITS,
            delay: Duration::ZERO,
            random_delay: Duration::ZERO,
        }
    }

    /// Jittered pacing for slow, listing-style upstreams: up to 2s of
    /// random delay and no fixed delay.
    pub fn sector() -> Self {
        Self {
            parallelism: 20,
            delay: Duration::ZERO,
            random_delay: Duration::from_secs(2),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_random_delay(mut self, random_delay: Duration) -> Self {
        self.random_delay = random_delay;
        self
    }

    /// # Errors
    /// Returns `ConfigError::ZeroTargetParallelism` when no call could ever run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::ZeroTargetParallelism);
        }
        Ok(())
    }
}

/// Per-target gates, created on first use.
///
/// Gates are kept until [`Politeness::prune_idle`] drops them, so hosts that
/// generate target names should prune periodically.
#[derive(Debug)]
pub struct Politeness {
    config: PolitenessConfig,
    gates: DashMap<String, Arc<Semaphore>, RandomState>,
}

impl Politeness {
    pub fn new(config: PolitenessConfig) -> Self {
        Self {
            config,
            gates: DashMap::with_hasher(RandomState::new()),
        }
    }

    fn gate(&self, target: &str) -> Arc<Semaphore> {
        if let Some(gate) = self.gates.get(target) {
            return Arc::clone(&gate);
        }
        let permits = self.config.parallelism.min(Semaphore::MAX_PERMITS);
        Arc::clone(
            &self
                .gates
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(permits))),
        )
    }

    /// Pause to apply before the next call: the fixed delay plus jitter.
    pub fn pause(&self) -> Duration {
        let jitter = if self.config.random_delay.is_zero() {
            Duration::ZERO
        } else {
            let max = u64::try_from(self.config.random_delay.as_nanos()).unwrap_or(u64::MAX);
            Duration::from_nanos(rand::thread_rng().gen_range(0..=max))
        };
        self.config.delay.saturating_add(jitter)
    }

    /// Wait for a slot on `target`, then for the pacing delay.
    ///
    /// The returned permit holds the slot until dropped. The pause is applied
    /// either way; `None` would only come from a closed gate, and gates are
    /// never closed.
    pub async fn admit(&self, target: &str) -> Option<OwnedSemaphorePermit> {
        let permit = self.gate(target).acquire_owned().await.ok();
        let pause = self.pause();
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        permit
    }

    /// Drop gates with no call in flight and return how many were removed.
    ///
    /// A target seen again afterwards gets a fresh gate.
    pub fn prune_idle(&self) -> usize {
        let permits = self.config.parallelism.min(Semaphore::MAX_PERMITS);
        let before = self.gates.len();
        // Clones are only taken under the shard lock, so a count of one here
        // means no caller holds this gate.
        self.gates.retain(|_, gate| {
            Arc::strong_count(gate) > 1 || gate.available_permits() < permits
        });
        before.saturating_sub(self.gates.len())
    }

    /// Targets with a gate.
    pub fn target_count(&self) -> usize {
        self.gates.len()
    }

    /// Free slots on `target`, `None` if the target was never used.
    pub fn available(&self, target: &str) -> Option<usize> {
        self.gates.get(target).map(|gate| gate.available_permits())
    }

    pub fn config(&self) -> &PolitenessConfig {
        &self.config
    }
}
