//! Redis-backed TTL cache.
//!
//! Lets several processes share fetched values. Values are stored as plain
//! strings with `SET EX`, so Redis handles expiry. Connection handling is
//! delegated to `redis::aio::ConnectionManager`, which reconnects on its own
//! after a dropped connection.
//!
//! ```rust,ignore
//! use fetch_throttle::{FetchOrchestrator, OrchestratorConfig, RedisCache};
//! use std::sync::Arc;
//!
//! let cache = RedisCache::connect("redis://127.0.0.1/").await?;
//! let orchestrator = FetchOrchestrator::new(Arc::new(cache), OrchestratorConfig::default())?;
//! ```

use crate::application::ports::{CacheError, CacheStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, ErrorKind, RedisError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Configuration for [`RedisCache`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Prepended to every cache key (default: "fetch-throttle:")
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "fetch-throttle:".to_string(),
        }
    }
}

impl RedisCacheConfig {
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }
}

impl From<RedisError> for CacheError {
    fn from(error: RedisError) -> Self {
        if error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_timeout()
            || error.kind() == ErrorKind::IoError
        {
            CacheError::Unavailable(error.to_string())
        } else {
            CacheError::Backend(error.to_string())
        }
    }
}

/// TTL cache stored in Redis.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect with the default key prefix.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisCacheConfig::default()).await
    }

    /// # Errors
    /// Returns an error if the URL is invalid or the first connection fails.
    pub async fn connect_with_config(url: &str, config: RedisCacheConfig) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection, config })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    pub fn config(&self) -> &RedisCacheConfig {
        &self.config
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(self.key(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        // EX takes whole seconds and rejects zero
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value, seconds).await?;
        Ok(())
    }
}
