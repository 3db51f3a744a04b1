// Dashboard Cache Service
// Owns the backend, breaker, metrics, warmer, adapter and health reporter for one process

use crate::caching::fallback::FallbackAdapter;
use crate::caching::health::{HealthReport, HealthReporter};
use crate::caching::memory_cache::MemoryBackend;
use crate::caching::metrics::MetricsStore;
use crate::caching::payloads::{DataType, MarketOverview, SignalBoard, TopMovers};
use crate::caching::redis_cache::RedisBackend;
use crate::caching::retrieval::RetrievalClient;
use crate::caching::warming::{
    CycleReport, HttpPopulationSource, PopulationSource, WarmingScheduler, WarmingTaskStatus,
};
use crate::caching::{CacheBackend, CacheMetricsSnapshot, CacheStatus};
use crate::config::ServiceConfig;
use crate::utils::circuit_breaker::CircuitBreaker;
use crate::utils::error::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One explicitly constructed cache subsystem.
///
/// Components share the breaker and metrics store through `Arc`s; nothing
/// here is process-global, so tests build as many services as they like.
pub struct DashboardCacheService {
    config: ServiceConfig,
    client: Arc<RetrievalClient>,
    warmer: Arc<WarmingScheduler>,
    adapter: FallbackAdapter,
    health: HealthReporter,
}

impl DashboardCacheService {
    /// Connect to Redis and the HTTP population source
    pub async fn connect(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let backend = RedisBackend::connect_with("redis", config.redis.clone()).await?;
        let source = HttpPopulationSource::new()?;
        Ok(Self::with_backend(config, Arc::new(backend), Arc::new(source)))
    }

    /// Standalone service on an in-process backend
    pub fn in_memory(config: ServiceConfig) -> Result<Self> {
        config.validate()?;
        let source = HttpPopulationSource::new()?;
        Ok(Self::with_backend(
            config,
            Arc::new(MemoryBackend::new("memory")),
            Arc::new(source),
        ))
    }

    /// Build the component graph around an injected backend and source
    pub fn with_backend(
        config: ServiceConfig,
        backend: Arc<dyn CacheBackend>,
        source: Arc<dyn PopulationSource>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
        let metrics = Arc::new(MetricsStore::new());
        let client = Arc::new(RetrievalClient::new(
            backend,
            breaker,
            metrics,
            config.retrieval.clone(),
        ));

        let warmer = Arc::new(WarmingScheduler::new(
            client.clone(),
            source,
            config.fallback.chains.clone(),
            config.warming.clone(),
        ));
        let adapter = FallbackAdapter::new(client.clone(), Some(warmer.clone()), config.fallback.clone());
        let health = HealthReporter::new(client.clone(), config.health.clone());

        Self {
            config,
            client,
            warmer,
            adapter,
            health,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn client(&self) -> &Arc<RetrievalClient> {
        &self.client
    }

    pub fn warmer(&self) -> &Arc<WarmingScheduler> {
        &self.warmer
    }

    pub fn adapter(&self) -> &FallbackAdapter {
        &self.adapter
    }

    /// Warm critical keys, then hand the remaining schedule to the background loop.
    ///
    /// Returns once the critical warm has finished, so callers can accept
    /// traffic right after.
    pub async fn start(&self) -> CycleReport {
        info!("Starting dashboard cache on backend {}", self.client.backend().name());
        let report = self.warmer.warm_critical_data().await;
        if report.failed() > 0 {
            warn!("{} critical keys could not be warmed", report.failed());
        }
        self.warmer.start().await;
        report
    }

    /// Stop the warmer after its in-flight tick
    pub async fn shutdown(&self) {
        info!("Shutting down dashboard cache");
        self.warmer.stop().await;
    }

    pub async fn get(&self, key: &str, default: Value, timeout: Duration) -> (Value, CacheStatus) {
        self.client.get(key, default, timeout).await
    }

    pub async fn get_with_fallback(&self, key: &str, default: Value, data_type: DataType) -> Value {
        self.adapter.get_with_fallback(key, default, data_type).await
    }

    pub async fn get_overview(&self) -> MarketOverview {
        self.adapter.get_overview().await
    }

    pub async fn get_signals(&self) -> SignalBoard {
        self.adapter.get_signals().await
    }

    pub async fn get_movers(&self) -> TopMovers {
        self.adapter.get_movers().await
    }

    /// Write a value with an explicit TTL
    pub async fn put(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<()> {
        self.client.put(key, value, ttl_seconds).await
    }

    pub async fn run_warming_cycle(&self) -> CycleReport {
        self.warmer.run_cycle().await
    }

    pub async fn warming_status(&self) -> Vec<WarmingTaskStatus> {
        self.warmer.warming_status().await
    }

    pub async fn get_cache_metrics(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            global_metrics: self.client.global_metrics().await,
            key_metrics: self.client.key_metrics().await,
            warming: self.warmer.stats().await,
        }
    }

    pub async fn health_check(&self) -> HealthReport {
        self.health.health_check().await
    }
}
