use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use crate::caching::fallback::FallbackConfig;
use crate::caching::health::HealthConfig;
use crate::caching::redis_cache::RedisCacheConfig;
use crate::caching::retrieval::RetrievalConfig;
use crate::caching::warming::WarmingConfig;
use crate::utils::circuit_breaker::CircuitBreakerConfig;
use crate::utils::error::{CacheError, Result};

/// Environment variable that overrides the Redis URL
pub const REDIS_URL_ENV: &str = "DASHBOARD_REDIS_URL";

/// Main configuration for the dashboard cache service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Redis connection settings
    pub redis: RedisCacheConfig,
    /// Retry and timeout policy for reads
    pub retrieval: RetrievalConfig,
    /// Backend failure gate
    pub circuit_breaker: CircuitBreakerConfig,
    /// Background warming and its priority table
    pub warming: WarmingConfig,
    /// Fallback chains and adapter budgets
    pub fallback: FallbackConfig,
    /// Health reporter settings
    pub health: HealthConfig,
}

impl ServiceConfig {
    /// Set the Redis URL
    pub fn with_redis_url<S: Into<String>>(mut self, url: S) -> Self {
        self.redis.redis_url = url.into();
        self
    }

    /// Set the population source base URL
    pub fn with_source_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.warming.source_base_url = Some(url.into());
        self
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(REDIS_URL_ENV) {
            if !url.trim().is_empty() {
                self.redis.redis_url = url;
            }
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.into())?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| CacheError::config(format!("Failed to parse config file: {}", e)))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: Into<PathBuf>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CacheError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.into(), content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let redis_url = url::Url::parse(&self.redis.redis_url)
            .map_err(|e| CacheError::config(format!("Invalid Redis URL: {}", e)))?;
        if !matches!(redis_url.scheme(), "redis" | "rediss" | "redis+unix" | "unix") {
            return Err(CacheError::config(format!(
                "Unsupported Redis URL scheme: {}",
                redis_url.scheme()
            )));
        }

        if self.redis.pool_size == 0 {
            return Err(CacheError::config("redis.pool_size must be greater than 0"));
        }

        if self.retrieval.default_timeout_ms == 0 || self.retrieval.write_timeout_ms == 0 {
            return Err(CacheError::config(
                "retrieval timeouts must be greater than 0",
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(CacheError::config(
                "circuit_breaker.failure_threshold must be greater than 0",
            ));
        }

        self.validate_warming()?;

        if self.fallback.primary_timeout_ms == 0
            || self.fallback.alternate_timeout_ms == 0
            || self.fallback.warmup_budget_ms == 0
        {
            return Err(CacheError::config("fallback timeouts must be greater than 0"));
        }

        if self.health.probe_key.is_empty() {
            return Err(CacheError::config("health.probe_key must not be empty"));
        }

        if self.health.check_timeout_seconds == 0 {
            return Err(CacheError::config(
                "health.check_timeout_seconds must be greater than 0",
            ));
        }

        Ok(())
    }

    fn validate_warming(&self) -> Result<()> {
        let warming = &self.warming;

        if warming.tick_seconds == 0 {
            return Err(CacheError::config("warming.tick_seconds must be greater than 0"));
        }

        if warming.max_concurrent == 0 {
            return Err(CacheError::config(
                "warming.max_concurrent must be greater than 0",
            ));
        }

        if warming.pause_threshold == 0 {
            return Err(CacheError::config(
                "warming.pause_threshold must be greater than 0",
            ));
        }

        if let Some(base) = &warming.source_base_url {
            url::Url::parse(base)
                .map_err(|e| CacheError::config(format!("Invalid warming source URL: {}", e)))?;
        }

        let mut seen = HashSet::new();
        for task in &warming.tasks {
            if task.key.is_empty() {
                return Err(CacheError::config("warming task key must not be empty"));
            }
            if !seen.insert(task.key.as_str()) {
                return Err(CacheError::config(format!(
                    "Duplicate warming task: {}",
                    task.key
                )));
            }
            if task.interval_seconds == 0 {
                return Err(CacheError::config(format!(
                    "Warming task {} needs a non-zero interval",
                    task.key
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::payloads::DataType;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.max_retries, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.warming.tick_seconds, 30);
        assert_eq!(config.fallback.warmup_interval_seconds, 300);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dashboard-cache.toml");

        let config = ServiceConfig::default().with_redis_url("redis://cache.internal:6380/2");
        config.save_to_file(&path).unwrap();

        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [circuit_breaker]
            failure_threshold = 3

            [fallback.chains]
            "market:overview" = ["overview"]
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_seconds, 60);
        assert_eq!(config.fallback.chains.alternates("market:overview"), ["overview"]);
        assert!(config.fallback.chains.alternates("signals:top").is_empty());
        assert_eq!(config.warming.tasks.len(), 7);
    }

    #[test]
    fn test_rejects_bad_redis_url() {
        let config = ServiceConfig::default().with_redis_url("http://localhost:6379");
        assert!(config.validate().is_err());

        let config = ServiceConfig::default().with_redis_url("not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_warming_task() {
        let mut config = ServiceConfig::default();
        let duplicate = config.warming.tasks[0].clone();
        config.warming.tasks.push(duplicate);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Duplicate warming task"));
    }

    #[test]
    fn test_task_data_type_in_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            [[warming.tasks]]
            key = "movers:top"
            priority = 2
            interval_seconds = 120
            data_type = "movers"
            source_timeout_ms = 1500
            ttl_seconds = 360
            "#,
        )
        .unwrap();

        assert_eq!(config.warming.tasks.len(), 1);
        assert_eq!(config.warming.tasks[0].data_type, DataType::Movers);
        assert!(config.warming.tasks[0].source_path.is_none());
    }
}
