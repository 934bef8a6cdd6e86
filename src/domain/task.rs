//! Named units of fetch work and their outcomes.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Politeness target used when a task does not name one.
pub const DEFAULT_TARGET: &str = "default";

/// Future returned by a producer.
pub type ProducerFuture<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Zero-argument capability that computes a task's value.
pub type Producer<T> = Box<dyn FnOnce() -> ProducerFuture<T> + Send>;

/// A named unit of work whose result is cached under `cache_key` for `ttl`.
pub struct FetchTask<T> {
    pub(crate) name: String,
    pub(crate) cache_key: String,
    pub(crate) ttl: Duration,
    pub(crate) target: Option<String>,
    pub(crate) producer: Producer<T>,
}

impl<T> FetchTask<T> {
    /// Create a task from an async closure.
    ///
    /// The producer is only invoked on a cache miss, and only by the first
    /// of any concurrent callers sharing the same `cache_key`.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        cache_key: impl Into<String>,
        ttl: Duration,
        producer: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cache_key: cache_key.into(),
            ttl,
            target: None,
            producer: Box::new(move || Box::pin(producer())),
        }
    }

    /// Name the outbound target this task talks to (e.g. a host).
    ///
    /// Tasks sharing a target share its politeness gate.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn target(&self) -> &str {
        self.target.as_deref().unwrap_or(DEFAULT_TARGET)
    }
}

impl<T> fmt::Debug for FetchTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchTask")
            .field("name", &self.name)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Failure of a single fetch task.
///
/// Cloneable so one deduplicated execution can report to every waiter.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The producer returned an error
    #[error("task `{task}` failed: {cause:#}")]
    Producer {
        task: String,
        cause: Arc<anyhow::Error>,
    },
    /// The producer did not finish within the configured deadline
    #[error("task `{task}` timed out after {after:?}")]
    TimedOut { task: String, after: Duration },
    /// The caller cancelled before a result was available
    #[error("task `{task}` was cancelled")]
    Cancelled { task: String },
    /// The produced value could not be serialized
    #[error("task `{task}` produced a value that could not be encoded: {reason}")]
    Encode { task: String, reason: String },
    /// A shared result could not be read back as the caller's type
    #[error("task `{task}` could not decode its result: {reason}")]
    Decode { task: String, reason: String },
    /// The producer panicked
    #[error("task `{task}` panicked")]
    Panicked { task: String },
    /// Two tasks in one batch share a name
    #[error("duplicate task name `{task}` in batch")]
    DuplicateTask { task: String },
}

impl FetchError {
    /// Name of the task this error belongs to.
    pub fn task(&self) -> &str {
        match self {
            FetchError::Producer { task, .. }
            | FetchError::TimedOut { task, .. }
            | FetchError::Cancelled { task }
            | FetchError::Encode { task, .. }
            | FetchError::Decode { task, .. }
            | FetchError::Panicked { task }
            | FetchError::DuplicateTask { task } => task,
        }
    }

    /// Re-attribute a shared error to the task that awaited it.
    pub(crate) fn for_task(mut self, name: &str) -> Self {
        match &mut self {
            FetchError::Producer { task, .. }
            | FetchError::TimedOut { task, .. }
            | FetchError::Cancelled { task }
            | FetchError::Encode { task, .. }
            | FetchError::Decode { task, .. }
            | FetchError::Panicked { task }
            | FetchError::DuplicateTask { task } => {
                if task.as_str() != name {
                    *task = name.to_string();
                }
            }
        }
        self
    }

    /// Whether the failure came from the caller giving up rather than the work.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled { .. })
    }
}

/// Outcome of a batch where successes and failures are both kept.
#[derive(Debug)]
pub struct BatchReport<T> {
    /// Values of the tasks that succeeded, by task name
    pub succeeded: HashMap<String, T>,
    /// Failed tasks in completion order
    pub failed: Vec<(String, FetchError)>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self {
            succeeded: HashMap::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchReport<T> {
    /// Whether every task succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Collapse into the batch-or-nothing contract.
    ///
    /// # Errors
    /// Returns the first failure to complete; successful values are dropped.
    pub fn into_result(mut self) -> Result<HashMap<String, T>, FetchError> {
        if self.failed.is_empty() {
            Ok(self.succeeded)
        } else {
            let (_, error) = self.failed.swap_remove(0);
            Err(error)
        }
    }
}
