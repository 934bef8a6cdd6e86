//! Observability counters for the limiter and the orchestrator.
//!
//! Counters are relaxed atomics: they are for dashboards, not for
//! synchronization, and a snapshot may mix values from slightly different
//! moments.

use ahash::RandomState;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Admission counters for one limiter.
///
/// Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct LimiterMetrics {
    inner: Arc<LimiterCounters>,
}

#[derive(Debug, Default)]
struct LimiterCounters {
    allowed: AtomicU64,
    denied: AtomicU64,
    evicted: AtomicU64,
}

impl LimiterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.inner.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self, count: usize) {
        self.inner
            .evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn allowed(&self) -> u64 {
        self.inner.allowed.load(Ordering::Relaxed)
    }

    pub fn denied(&self) -> u64 {
        self.inner.denied.load(Ordering::Relaxed)
    }

    pub fn evicted(&self) -> u64 {
        self.inner.evicted.load(Ordering::Relaxed)
    }

    /// Get a point-in-time copy of every counter.
    pub fn snapshot(&self) -> LimiterMetricsSnapshot {
        LimiterMetricsSnapshot {
            allowed: self.allowed(),
            denied: self.denied(),
            evicted: self.evicted(),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.inner.allowed.store(0, Ordering::Relaxed);
        self.inner.denied.store(0, Ordering::Relaxed);
        self.inner.evicted.store(0, Ordering::Relaxed);
    }
}

/// Copy of [`LimiterMetrics`] at one moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterMetricsSnapshot {
    /// Checks that were admitted
    pub allowed: u64,
    /// Checks that were denied
    pub denied: u64,
    /// Idle trackers removed by sweeps
    pub evicted: u64,
}

impl LimiterMetricsSnapshot {
    /// Share of checks that were denied, 0.0 when nothing was checked.
    pub fn denial_rate(&self) -> f64 {
        let total = self.allowed.saturating_add(self.denied);
        if total == 0 {
            0.0
        } else {
            self.denied as f64 / total as f64
        }
    }
}

/// Cache and execution counters for one orchestrator.
#[derive(Debug, Clone, Default)]
pub struct FetchMetrics {
    inner: Arc<FetchCounters>,
}

#[derive(Debug, Default)]
struct FetchCounters {
    per_task: DashMap<String, TaskCounters, RandomState>,
    producer_calls: AtomicU64,
    deduplicated: AtomicU64,
    cache_read_faults: AtomicU64,
    cache_write_faults: AtomicU64,
}

#[derive(Debug, Default)]
struct TaskCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FetchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn task(&self, name: &str, f: impl FnOnce(&TaskCounters)) {
        if let Some(counters) = self.inner.per_task.get(name) {
            f(&counters);
            return;
        }
        let counters = self.inner.per_task.entry(name.to_string()).or_default();
        f(&counters);
    }

    pub(crate) fn record_hit(&self, task: &str) {
        self.task(task, |c| {
            c.hits.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub(crate) fn record_miss(&self, task: &str) {
        self.task(task, |c| {
            c.misses.fetch_add(1, Ordering::Relaxed);
        });
    }

    pub(crate) fn record_producer_call(&self) {
        self.inner.producer_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deduplicated(&self) {
        self.inner.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read_fault(&self) {
        self.inner.cache_read_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_fault(&self) {
        self.inner.cache_write_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Hits and misses recorded for one task name.
    pub fn task_stats(&self, name: &str) -> Option<TaskCacheStats> {
        self.inner.per_task.get(name).map(|c| TaskCacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
        })
    }

    pub fn producer_calls(&self) -> u64 {
        self.inner.producer_calls.load(Ordering::Relaxed)
    }

    pub fn deduplicated(&self) -> u64 {
        self.inner.deduplicated.load(Ordering::Relaxed)
    }

    /// Get a point-in-time copy of every counter.
    pub fn snapshot(&self) -> FetchMetricsSnapshot {
        let tasks = self
            .inner
            .per_task
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    TaskCacheStats {
                        hits: entry.hits.load(Ordering::Relaxed),
                        misses: entry.misses.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();

        FetchMetricsSnapshot {
            tasks,
            producer_calls: self.producer_calls(),
            deduplicated: self.deduplicated(),
            cache_read_faults: self.inner.cache_read_faults.load(Ordering::Relaxed),
            cache_write_faults: self.inner.cache_write_faults.load(Ordering::Relaxed),
        }
    }

    /// Reset every counter and forget all task names.
    ///
    /// Per-task counters are kept for every task name ever fetched. Hosts
    /// that generate task names should call this periodically, or the map
    /// grows with every new name.
    pub fn reset(&self) {
        self.inner.per_task.clear();
        self.inner.producer_calls.store(0, Ordering::Relaxed);
        self.inner.deduplicated.store(0, Ordering::Relaxed);
        self.inner.cache_read_faults.store(0, Ordering::Relaxed);
        self.inner.cache_write_faults.store(0, Ordering::Relaxed);
    }
}

/// Cache outcome counts for one task name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl TaskCacheStats {
    /// Hit ratio (0.0 to 1.0), 0.0 when the task never ran.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits.saturating_add(self.misses);
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Copy of [`FetchMetrics`] at one moment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchMetricsSnapshot {
    /// Hit/miss counts keyed by task name
    pub tasks: HashMap<String, TaskCacheStats>,
    /// Producer executions actually started
    pub producer_calls: u64,
    /// Misses that joined an execution already in flight
    pub deduplicated: u64,
    /// Cache reads that failed or returned undecodable data
    pub cache_read_faults: u64,
    /// Cache writes that failed
    pub cache_write_faults: u64,
}

impl FetchMetricsSnapshot {
    /// Hit ratio across every task.
    pub fn hit_rate(&self) -> f64 {
        let totals = self
            .tasks
            .values()
            .fold(TaskCacheStats::default(), |acc, s| TaskCacheStats {
                hits: acc.hits + s.hits,
                misses: acc.misses + s.misses,
            });
        totals.hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_metrics() {
        let metrics = LimiterMetrics::new();
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_allowed();
        metrics.record_denied();
        metrics.record_evicted(4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.allowed, 3);
        assert_eq!(snapshot.denied, 1);
        assert_eq!(snapshot.evicted, 4);
        assert_eq!(snapshot.denial_rate(), 0.25);

        metrics.reset();
        assert_eq!(metrics.snapshot().denial_rate(), 0.0);
    }

    #[test]
    fn test_limiter_metrics_shared_between_clones() {
        let metrics = LimiterMetrics::new();
        let clone = metrics.clone();
        clone.record_denied();
        assert_eq!(metrics.denied(), 1);
    }

    #[test]
    fn test_fetch_metrics_per_task() {
        let metrics = FetchMetrics::new();
        metrics.record_hit("stocks");
        metrics.record_hit("stocks");
        metrics.record_hit("stocks");
        metrics.record_miss("stocks");
        metrics.record_miss("energy");

        let stocks = metrics.task_stats("stocks").unwrap();
        assert_eq!(stocks, TaskCacheStats { hits: 3, misses: 1 });
        assert_eq!(stocks.hit_rate(), 0.75);
        assert!(metrics.task_stats("unknown").is_none());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks.len(), 2);
        assert_eq!(snapshot.hit_rate(), 0.6);
    }

    #[test]
    fn test_fetch_metrics_totals_and_reset() {
        let metrics = FetchMetrics::new();
        metrics.record_producer_call();
        metrics.record_deduplicated();
        metrics.record_read_fault();
        metrics.record_write_fault();
        metrics.record_write_fault();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.producer_calls, 1);
        assert_eq!(snapshot.deduplicated, 1);
        assert_eq!(snapshot.cache_read_faults, 1);
        assert_eq!(snapshot.cache_write_faults, 2);

        metrics.reset();
        let snapshot = metrics.snapshot();
        assert!(snapshot.tasks.is_empty());
        assert_eq!(snapshot.cache_write_faults, 0);
    }

    #[test]
    fn test_reset_forgets_generated_task_names() {
        let metrics = FetchMetrics::new();
        for i in 0..100 {
            metrics.record_miss(&format!("caller-{i}"));
        }
        assert_eq!(metrics.snapshot().tasks.len(), 100);

        metrics.reset();
        assert!(metrics.task_stats("caller-0").is_none());
        assert!(metrics.snapshot().tasks.is_empty());
    }
}
