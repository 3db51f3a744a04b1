// Redis Cache Backend
// Shared key-value store behind the dashboard, accessed through a deadpool connection pool

use super::CacheBackend;
use crate::utils::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Redis cache backend
pub struct RedisBackend {
    /// Backend name
    name: String,
    /// Redis connection pool
    pool: Option<deadpool_redis::Pool>,
    /// Backend configuration
    config: RedisCacheConfig,
}

/// Redis backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisCacheConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Seconds to wait for a pooled connection
    pub connection_timeout: u64,
    /// Key prefix for namespacing; empty by default so keys match what the API layer writes
    pub key_prefix: String,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            pool_size: 16,
            connection_timeout: 5,
            key_prefix: String::new(),
        }
    }
}

impl RedisBackend {
    /// Create a new, not yet connected, Redis backend
    pub fn new(name: impl Into<String>, config: RedisCacheConfig) -> Self {
        Self {
            name: name.into(),
            pool: None,
            config,
        }
    }

    /// Create and connect in one step
    pub async fn connect_with(name: impl Into<String>, config: RedisCacheConfig) -> Result<Self> {
        let mut backend = Self::new(name, config);
        backend.connect().await?;
        Ok(backend)
    }

    /// Initialize the connection pool and verify it with a PING
    pub async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Redis: {}", self.config.redis_url);

        let mut pool_config = deadpool_redis::Config::from_url(&self.config.redis_url);
        pool_config.pool = Some(deadpool_redis::PoolConfig::new(self.config.pool_size));
        let pool = pool_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheError::backend(format!("Failed to create Redis pool: {}", e)))?;

        self.pool = Some(pool);
        self.ping().await?;

        info!("Successfully connected to Redis: {}", self.name);
        Ok(())
    }

    /// Get full key with prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| CacheError::backend("Redis not connected"))?;

        let wait = Duration::from_secs(self.config.connection_timeout);
        match tokio::time::timeout(wait, pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(CacheError::backend(format!(
                "Failed to get connection: {}",
                e
            ))),
            Err(_) => Err(CacheError::timeout(wait)),
        }
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let data: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(data)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<()> {
        let mut conn = self.connection().await?;
        let full_key = self.full_key(key);

        if ttl_seconds > 0 {
            let _: () = redis::cmd("SETEX")
                .arg(&full_key)
                .arg(ttl_seconds)
                .arg(value)
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .query_async(&mut conn)
                .await?;
        }

        debug!("Set Redis entry: {} (TTL: {}s)", key, ttl_seconds);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: u32 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::backend(format!("Unexpected PING reply: {}", reply)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_config_default() {
        let config = RedisCacheConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.connection_timeout, 5);
        assert!(config.key_prefix.is_empty());
    }

    #[test]
    fn test_full_key_applies_prefix() {
        let backend = RedisBackend::new(
            "redis",
            RedisCacheConfig {
                key_prefix: "dash:".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(backend.full_key("market:overview"), "dash:market:overview");
    }

    #[tokio::test]
    async fn test_unconnected_backend_errors() {
        let backend = RedisBackend::new("redis", RedisCacheConfig::default());
        let err = backend.get("market:overview").await.unwrap_err();
        assert!(err.to_string().contains("Redis not connected"));
    }
}
