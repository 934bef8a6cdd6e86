//! Cache-coordinated fetch fan-out.
//!
//! Each task is looked up in the cache first. A miss runs the task's
//! producer, at most once per cache key at a time, paced by the target's
//! politeness gate and bounded by the producer timeout. A successful value is
//! written back to the cache on a best-effort basis. Batches run their tasks
//! concurrently up to `max_parallelism`.
//!
//! Cache faults never fail a task: a read fault is a miss and a write fault
//! is logged and dropped.

use crate::application::flight::{FlightResult, FlightTable};
use crate::application::metrics::FetchMetrics;
use crate::application::politeness::{Politeness, PolitenessConfig};
use crate::application::ports::CacheStore;
use crate::domain::config::ConfigError;
use crate::domain::task::{BatchReport, FetchError, FetchTask, Producer, DEFAULT_TARGET};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default ceiling on concurrently running tasks in one batch.
pub const DEFAULT_MAX_PARALLELISM: usize = 20;

/// Default deadline for a single producer call.
pub const DEFAULT_PRODUCER_TIMEOUT: Duration = Duration::from_secs(30);

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Tasks of one batch allowed to run at once; the rest queue
    pub max_parallelism: usize,
    /// Deadline for each producer call, `None` for no deadline
    pub producer_timeout: Option<Duration>,
    /// Per-target pacing of producer calls
    #[serde(default)]
    pub politeness: PolitenessConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallelism: DEFAULT_MAX_PARALLELISM,
            producer_timeout: Some(DEFAULT_PRODUCER_TIMEOUT),
            politeness: PolitenessConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_producer_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.producer_timeout = timeout;
        self
    }

    pub fn with_politeness(mut self, politeness: PolitenessConfig) -> Self {
        self.politeness = politeness;
        self
    }

    /// # Errors
    /// `ConfigError::ZeroParallelism` or `ConfigError::ZeroTargetParallelism`
    /// when no task could ever run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::ZeroParallelism);
        }
        self.politeness.validate()
    }
}

/// Runs fetch tasks against a shared cache.
///
/// Cloning is cheap; clones share the cache, the in-flight table, the
/// politeness gates and the metrics.
#[derive(Clone)]
pub struct FetchOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    cache: Arc<dyn CacheStore>,
    config: OrchestratorConfig,
    flights: Arc<FlightTable>,
    politeness: Politeness,
    metrics: FetchMetrics,
}

impl FetchOrchestrator {
    /// # Errors
    /// Returns a [`ConfigError`] if `config` fails validation.
    pub fn new(cache: Arc<dyn CacheStore>, config: OrchestratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                cache,
                politeness: Politeness::new(config.politeness.clone()),
                config,
                flights: Arc::new(FlightTable::new()),
                metrics: FetchMetrics::new(),
            }),
        })
    }

    /// Resolve one task: cached value if present, otherwise run its producer.
    ///
    /// If another caller is already producing the same cache key, this call
    /// waits for that result instead and never invokes its own producer.
    /// Cancelling `cancel` abandons the wait; a started producer still runs
    /// to completion and fills the cache.
    ///
    /// # Errors
    /// Any [`FetchError`] other than `DuplicateTask`.
    pub async fn fetch_one<T>(
        &self,
        task: FetchTask<T>,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        let FetchTask {
            name,
            cache_key,
            ttl,
            target,
            producer,
        } = task;

        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled { task: name });
        }

        let lookup = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { task: name }),
            lookup = self.inner.cache.get(&cache_key) => lookup,
        };

        match lookup {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    self.inner.metrics.record_hit(&name);
                    debug!(task = %name, key = %cache_key, "cache hit");
                    return Ok(value);
                }
                Err(error) => {
                    self.inner.metrics.record_read_fault();
                    warn!(task = %name, key = %cache_key, %error, "discarding undecodable cached value");
                }
            },
            Ok(None) => {}
            Err(error) => {
                self.inner.metrics.record_read_fault();
                warn!(task = %name, key = %cache_key, %error, "cache read failed, treating as miss");
            }
        }

        self.inner.metrics.record_miss(&name);
        debug!(task = %name, key = %cache_key, "cache miss");

        let target = target.unwrap_or_else(|| DEFAULT_TARGET.to_string());
        let (flight, started) = self.inner.flights.join_or_start(&cache_key, &name, || {
            produce(
                Arc::clone(&self.inner),
                name.clone(),
                cache_key.clone(),
                ttl,
                target,
                producer,
            )
            .boxed()
        });
        if !started {
            self.inner.metrics.record_deduplicated();
            debug!(task = %name, key = %cache_key, "joined in-flight fetch");
        }

        let shared = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled { task: name }),
            result = flight => result.map_err(|error| error.for_task(&name))?,
        };

        serde_json::from_str(&shared).map_err(|error| FetchError::Decode {
            task: name,
            reason: error.to_string(),
        })
    }

    /// Run a batch and keep every outcome.
    ///
    /// At most `max_parallelism` tasks run at once. Failures are listed in
    /// completion order. If two tasks share a name nothing runs and every
    /// repeat is reported as `DuplicateTask`.
    pub async fn fetch_all_settled<T, I>(&self, tasks: I, cancel: &CancellationToken) -> BatchReport<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = FetchTask<T>>,
    {
        let tasks: Vec<FetchTask<T>> = tasks.into_iter().collect();
        let mut report = BatchReport::default();

        let duplicates: Vec<String> = {
            let mut seen = HashSet::with_capacity(tasks.len());
            tasks
                .iter()
                .filter(|task| !seen.insert(task.name()))
                .map(|task| task.name().to_string())
                .collect()
        };
        if !duplicates.is_empty() {
            warn!(?duplicates, "rejecting batch with duplicate task names");
            report.failed = duplicates
                .into_iter()
                .map(|name| (name.clone(), FetchError::DuplicateTask { task: name }))
                .collect();
            return report;
        }

        let gate = Semaphore::new(self.inner.config.max_parallelism.min(Semaphore::MAX_PERMITS));
        let gate = &gate;
        let mut units: FuturesUnordered<_> = tasks
            .into_iter()
            .map(|task| async move {
                let name = task.name().to_string();
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = gate.acquire() => permit.ok(),
                };
                let result = match permit {
                    Some(_permit) => self.fetch_one(task, cancel).await,
                    None => Err(FetchError::Cancelled { task: name.clone() }),
                };
                (name, result)
            })
            .collect();

        while let Some((name, result)) = units.next().await {
            match result {
                Ok(value) => {
                    report.succeeded.insert(name, value);
                }
                Err(error) => report.failed.push((name, error)),
            }
        }

        if !report.failed.is_empty() {
            debug!(
                succeeded = report.succeeded.len(),
                failed = report.failed.len(),
                "batch finished with failures"
            );
        }
        report
    }

    /// Run a batch and return every value, or the first failure.
    ///
    /// Every task runs to completion even when one fails early, so their
    /// values still land in the cache.
    ///
    /// # Errors
    /// The first task to fail, by completion order. No partial map is
    /// returned.
    pub async fn fetch_all<T, I>(
        &self,
        tasks: I,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, T>, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        I: IntoIterator<Item = FetchTask<T>>,
    {
        self.fetch_all_settled(tasks, cancel).await.into_result()
    }

    pub fn metrics(&self) -> &FetchMetrics {
        &self.inner.metrics
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Forget politeness gates of targets with nothing in flight.
    ///
    /// Gates are created per target name and otherwise never released.
    pub fn prune_idle_targets(&self) -> usize {
        self.inner.politeness.prune_idle()
    }

    /// Producer executions currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.len()
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("cache", &self.inner.cache)
            .field("config", &self.inner.config)
            .field("in_flight", &self.inner.flights.len())
            .finish()
    }
}

/// One producer execution, from politeness gate to cache write.
async fn produce<T>(
    inner: Arc<Inner>,
    name: String,
    cache_key: String,
    ttl: Duration,
    target: String,
    producer: Producer<T>,
) -> FlightResult
where
    T: Serialize + Send + 'static,
{
    let permit = inner.politeness.admit(&target).await;
    inner.metrics.record_producer_call();

    let work = producer();
    let outcome = match inner.config.producer_timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(task = %name, key = %cache_key, timeout = ?limit, "producer timed out");
                return Err(FetchError::TimedOut {
                    task: name,
                    after: limit,
                });
            }
        },
        None => work.await,
    };
    drop(permit);

    let value = outcome.map_err(|cause| FetchError::Producer {
        task: name.clone(),
        cause: Arc::new(cause),
    })?;
    let encoded = serde_json::to_string(&value).map_err(|error| FetchError::Encode {
        task: name.clone(),
        reason: error.to_string(),
    })?;

    if let Err(error) = inner.cache.set(&cache_key, encoded.clone(), ttl).await {
        inner.metrics.record_write_fault();
        warn!(task = %name, key = %cache_key, %error, "cache write failed");
    }

    Ok(Arc::from(encoded))
}
