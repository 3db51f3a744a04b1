//! Service Integration Tests
//!
//! End-to-end behaviour of the assembled cache service: startup warming,
//! fallback reads, metrics export, health and configuration loading.

use async_trait::async_trait;
use dashboard_cache::caching::payloads::FALLBACK_STATUS;
use dashboard_cache::caching::warming::PopulationSource;
use dashboard_cache::{
    CacheBackend, CacheError, CacheStatus, DashboardCacheService, DataType, HealthStatus,
    MemoryBackend, Result, ServiceConfig,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

/// Analytics API stand-in answering by URL suffix
struct MockSource {
    responses: HashMap<&'static str, Value>,
}

impl MockSource {
    fn dashboard() -> Arc<Self> {
        let mut responses = HashMap::new();
        responses.insert(
            "/api/market/overview",
            json!({
                "total_symbols": 412,
                "active_symbols": 398,
                "total_volume_24h": 8.2e10,
                "gainers_count": 250,
                "losers_count": 148,
                "sentiment": "bullish"
            }),
        );
        responses.insert(
            "/api/signals/top",
            json!({
                "signals": [
                    {"symbol": "BTCUSDT", "score": 87.5, "direction": "long"},
                    {"symbol": "ETHUSDT", "score": 64.0, "direction": "long"}
                ],
                "total_signals": 2
            }),
        );
        responses.insert(
            "/api/market/movers",
            json!({
                "gainers": [{"symbol": "SOLUSDT", "price": 142.1, "price_change_24h": 12.4}],
                "losers": [{"symbol": "DOGEUSDT", "price": 0.11, "price_change_24h": -8.3}]
            }),
        );
        Arc::new(Self { responses })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            responses: HashMap::new(),
        })
    }
}

#[async_trait]
impl PopulationSource for MockSource {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Value> {
        self.responses
            .iter()
            .find(|(path, _)| url.ends_with(*path))
            .map(|(_, value)| value.clone())
            .ok_or_else(|| CacheError::source(url, "HTTP 404 Not Found"))
    }
}

/// Backend that refuses every operation
struct DownBackend;

#[async_trait]
impl CacheBackend for DownBackend {
    fn name(&self) -> &str {
        "down"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Err(CacheError::backend("connection refused"))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_seconds: u64) -> Result<()> {
        Err(CacheError::backend("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(CacheError::backend("connection refused"))
    }

    async fn ping(&self) -> Result<()> {
        Err(CacheError::backend("connection refused"))
    }
}

/// Backend whose calls never complete
struct StalledBackend;

#[async_trait]
impl CacheBackend for StalledBackend {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        std::future::pending().await
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl_seconds: u64) -> Result<()> {
        std::future::pending().await
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        std::future::pending().await
    }

    async fn ping(&self) -> Result<()> {
        std::future::pending().await
    }
}

fn memory_service(source: Arc<MockSource>) -> DashboardCacheService {
    DashboardCacheService::with_backend(
        ServiceConfig::default(),
        Arc::new(MemoryBackend::new("memory")),
        source,
    )
}

#[tokio::test(start_paused = true)]
async fn test_start_warms_critical_keys() {
    let service = memory_service(MockSource::dashboard());

    let report = service.start().await;
    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.failed(), 0);
    assert!(service.warmer().is_running());

    let overview = service.get_overview().await;
    assert_eq!(overview.total_symbols, Some(412));
    assert!(overview.status.is_none());

    let signals = service.get_signals().await;
    assert_eq!(signals.signals.len(), 2);
    assert_eq!(signals.signals[0].symbol, "BTCUSDT");

    let movers = service.get_movers().await;
    assert_eq!(movers.gainers[0].symbol, "SOLUSDT");

    service.shutdown().await;
    assert!(!service.warmer().is_running());
}

#[tokio::test(start_paused = true)]
async fn test_metrics_snapshot_tracks_reads() {
    let service = memory_service(MockSource::dashboard());
    service.start().await;

    service.get_overview().await;
    service
        .get("orderflow:unknown", Value::Null, Duration::from_millis(500))
        .await;

    let snapshot = service.get_cache_metrics().await;
    assert_eq!(snapshot.key_metrics["market:overview"].hits, 1);
    assert_eq!(snapshot.key_metrics["orderflow:unknown"].misses, 1);
    assert!(snapshot.global_metrics.hit_ratio() > 0.0);
    assert!(!snapshot.global_metrics.circuit_breaker_open);
    assert!(snapshot.warming.source_refreshes >= 3);

    let exported = serde_json::to_value(&snapshot).unwrap();
    assert!(exported["global_metrics"]["hits"].is_u64());

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_on_memory_backend() {
    let service = memory_service(MockSource::dashboard());
    service.start().await;

    let report = service.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    let checks = report.checks.unwrap();
    assert!(checks.critical_keys.values().all(|check| check.has_data));

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backend_outage_serves_placeholders() {
    let service =
        DashboardCacheService::with_backend(ServiceConfig::default(), Arc::new(DownBackend), MockSource::offline());

    let overview = service.get_overview().await;
    assert_eq!(overview.status.as_deref(), Some(FALLBACK_STATUS));
    assert_eq!(overview.total_symbols, Some(0));
    assert_eq!(overview.total_volume_24h, Some(0.0));

    let movers = service.get_movers().await;
    assert!(movers.gainers.is_empty());
    assert_eq!(movers.status.as_deref(), Some(FALLBACK_STATUS));

    let report = service.health_check().await;
    assert_eq!(report.status, HealthStatus::Unhealthy);
}

async fn assert_startup_outage_is_bounded(backend: Arc<dyn CacheBackend>, start_budget: Duration) {
    let service = DashboardCacheService::with_backend(ServiceConfig::default(), backend, MockSource::offline());
    let started = Instant::now();

    let report = tokio::time::timeout(Duration::from_secs(60), service.start())
        .await
        .expect("startup warm must not hang");
    assert_eq!(report.failed(), 4);
    assert!(started.elapsed() < start_budget);

    // Startup counts as a recent warm and the breaker is open: no further waiting
    let read_started = Instant::now();
    let overview = service.get_overview().await;
    assert!(read_started.elapsed() < Duration::from_secs(1));
    assert_eq!(overview.status.as_deref(), Some(FALLBACK_STATUS));
    assert_eq!(overview.total_symbols, Some(0));

    let snapshot = service.get_cache_metrics().await;
    assert!(snapshot.global_metrics.circuit_breaker_open);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_during_refused_connections() {
    assert_startup_outage_is_bounded(Arc::new(DownBackend), Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_during_stalled_backend() {
    assert_startup_outage_is_bounded(Arc::new(StalledBackend), Duration::from_secs(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_raw_string_key_round_trip() {
    let service = memory_service(MockSource::offline());
    service
        .put("analysis:latest_text", &json!("Funding rates cooling"), 600)
        .await
        .unwrap();

    let (value, status) = service
        .get("analysis:latest_text", Value::Null, Duration::from_secs(1))
        .await;
    assert_eq!(status, CacheStatus::Hit);
    assert_eq!(value, json!("Funding rates cooling"));
}

#[tokio::test(start_paused = true)]
async fn test_config_file_overrides_chains() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cache.toml");
    std::fs::write(
        &path,
        r#"
        [warming]
        tasks = []

        [fallback.chains]
        "market:overview" = ["legacy:overview"]
        "#,
    )
    .unwrap();

    let config = ServiceConfig::from_file(&path).unwrap();
    config.validate().unwrap();

    let backend = MemoryBackend::new("memory");
    backend
        .set(
            "legacy:overview",
            json!({"total_symbols": 120, "total_volume_24h": 1.0e9})
                .to_string()
                .as_bytes(),
            0,
        )
        .await
        .unwrap();
    let service = DashboardCacheService::with_backend(config, Arc::new(backend), MockSource::offline());

    let value = service
        .get_with_fallback("market:overview", json!({}), DataType::Overview)
        .await;
    assert_eq!(value["total_symbols"], 120);
}
