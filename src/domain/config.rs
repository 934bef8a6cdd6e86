//! Limiter configuration profiles.
//!
//! A [`LimiterConfig`] is fixed for the lifetime of a limiter. Callers that
//! need several profiles build several limiters, each under its own
//! namespace so their keys never collide.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::time::Duration;
use thiserror::Error;

/// Default refill rate in tokens per second.
pub const DEFAULT_RATE: f64 = 10.0;

/// Default bucket capacity.
pub const DEFAULT_BURST: u32 = 20;

/// Default idle window after which a key's bucket is forgotten.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(60 * 60);

/// Longest accepted idle window. It doubles as the sweep period, so it must
/// stay representable when added to the current instant.
pub const MAX_EXPIRATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Error returned when a configuration cannot be used.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Refill rate must be finite and greater than zero
    #[error("refill rate must be finite and greater than 0, got {0}")]
    InvalidRate(f64),
    /// Expiration window must be greater than zero
    #[error("expiration window must be greater than 0")]
    ZeroExpiration,
    /// Expiration window exceeds [`MAX_EXPIRATION`]
    #[error("expiration window must be at most {max:?}, got {got:?}")]
    ExpirationTooLong { got: Duration, max: Duration },
    /// Batch parallelism must be greater than zero
    #[error("max parallelism must be greater than 0")]
    ZeroParallelism,
    /// Per-target parallelism must be greater than zero
    #[error("per-target parallelism must be greater than 0")]
    ZeroTargetParallelism,
}

/// Token bucket profile shared by every key of one limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Tokens refilled per second
    pub rate: f64,
    /// Bucket capacity. Zero is valid and denies every request.
    pub burst: u32,
    /// Idle window before a bucket is evicted; also the sweep interval
    pub expiration: Duration,
    /// Prefix applied to every key, separating limiters that share keys
    #[serde(default)]
    pub namespace: Option<String>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            expiration: DEFAULT_EXPIRATION,
            namespace: None,
        }
    }
}

impl LimiterConfig {
    /// Create a validated configuration without a namespace.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidRate` for a zero, negative or non-finite
    /// rate, `ConfigError::ZeroExpiration` for a zero expiration and
    /// `ConfigError::ExpirationTooLong` past [`MAX_EXPIRATION`].
    pub fn new(rate: f64, burst: u32, expiration: Duration) -> Result<Self, ConfigError> {
        let config = Self {
            rate,
            burst,
            expiration,
            namespace: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Profile for API-key callers: 10/s, burst 20.
    pub fn api() -> Self {
        Self::default().with_namespace("api")
    }

    /// Profile for per-address callers: 5/s, burst 10.
    pub fn ip() -> Self {
        Self {
            rate: 5.0,
            burst: 10,
            ..Self::default()
        }
        .with_namespace("ip")
    }

    /// Stricter profile for the expensive per-category endpoint: 2/s, burst 5.
    pub fn sector_api() -> Self {
        Self {
            rate: 2.0,
            burst: 5,
            ..Self::default()
        }
        .with_namespace("sector_api")
    }

    /// Set the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the expiration window.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Check the invariants a limiter relies on.
    ///
    /// # Errors
    /// See [`LimiterConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(ConfigError::InvalidRate(self.rate));
        }
        if self.expiration.is_zero() {
            return Err(ConfigError::ZeroExpiration);
        }
        if self.expiration > MAX_EXPIRATION {
            return Err(ConfigError::ExpirationTooLong {
                got: self.expiration,
                max: MAX_EXPIRATION,
            });
        }
        Ok(())
    }

    /// The storage key for a caller key under this profile's namespace.
    pub fn scoped_key<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match &self.namespace {
            Some(namespace) => Cow::Owned(format!("{namespace}:{key}")),
            None => Cow::Borrowed(key),
        }
    }
}
