//! Background eviction of idle trackers.
//!
//! The sweeper wakes once per expiration window and drops every bucket that
//! has not been checked within that window. A key that comes back afterwards
//! starts again with a full bucket.

use crate::application::metrics::LimiterMetrics;
use crate::application::ports::Storage;
use crate::application::registry::TrackerRegistry;
use crate::domain::bucket::TokenBucket;
use crate::domain::config::MAX_EXPIRATION;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Error returned when the sweeper cannot be started.
#[derive(Debug, Error)]
pub enum StartError {
    /// A sweeper for this limiter is already running
    #[error("eviction sweeper is already running")]
    AlreadyRunning,
    /// `start` was called outside a tokio runtime
    #[error("eviction sweeper needs a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

/// Error returned when the sweeper task cannot be joined.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The sweeper task panicked or was aborted
    #[error("eviction sweeper did not stop cleanly: {0}")]
    Join(#[from] JoinError),
}

/// Run one eviction pass and record it.
pub fn sweep_idle<S>(registry: &TrackerRegistry<S>, metrics: &LimiterMetrics) -> usize
where
    S: Storage<String, TokenBucket> + Clone,
{
    let evicted = registry.evict_idle();
    if evicted > 0 {
        metrics.record_evicted(evicted);
        info!(
            evicted,
            remaining = registry.len(),
            "evicted idle rate limit trackers"
        );
    } else {
        debug!(tracked = registry.len(), "eviction sweep found nothing idle");
    }
    evicted
}

/// Periodic sweep over one registry.
pub struct EvictionSweeper<S>
where
    S: Storage<String, TokenBucket> + Clone,
{
    registry: TrackerRegistry<S>,
    metrics: LimiterMetrics,
    period: Duration,
}

impl<S> EvictionSweeper<S>
where
    S: Storage<String, TokenBucket> + Clone + 'static,
{
    /// Create a sweeper that runs every `registry.config().expiration`,
    /// capped at [`MAX_EXPIRATION`].
    pub fn new(registry: TrackerRegistry<S>, metrics: LimiterMetrics) -> Self {
        let period = registry.config().expiration.min(MAX_EXPIRATION);
        Self {
            registry,
            metrics,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// # Errors
    /// Returns `StartError::NoRuntime` when called outside a runtime.
    pub fn spawn(self) -> Result<SweeperHandle, StartError> {
        let runtime = tokio::runtime::Handle::try_current()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = runtime.spawn(async move {
            // First sweep happens one full period after start.
            let now = Instant::now();
            let first = now.checked_add(self.period).unwrap_or(now);
            let mut ticker = interval_at(first, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period = ?self.period, "eviction sweeper started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        sweep_idle(&self.registry, &self.metrics);
                    }
                }
            }

            info!("eviction sweeper stopped");
        });

        Ok(SweeperHandle {
            cancel,
            task: Some(task),
        })
    }
}

/// Handle to a running sweeper.
///
/// Dropping the handle cancels the loop without waiting for it;
/// [`SweeperHandle::shutdown`] cancels and waits.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the loop and wait for it to exit.
    ///
    /// # Errors
    /// Returns `ShutdownError::Join` if the task panicked.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
