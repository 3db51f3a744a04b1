// Cache Metrics Store
// Per-key and global retrieval counters with exponentially smoothed response times

use super::CacheStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Smoothing factor for per-key response times (hits only)
pub const KEY_EMA_ALPHA: f64 = 0.2;
/// Smoothing factor for the global response time
pub const GLOBAL_EMA_ALPHA: f64 = 0.1;

/// Counters for a single cache key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Exponential moving average over hit latencies
    pub avg_response_time_ms: f64,
    pub last_update: DateTime<Utc>,
}

/// Counters aggregated across every key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub timeouts: u64,
    /// Exponential moving average over every backend round trip
    pub avg_response_time_ms: f64,
    pub last_update: DateTime<Utc>,
    /// Filled in from the circuit breaker when a snapshot is taken
    pub circuit_breaker_failures: u32,
    pub circuit_breaker_open: bool,
}

impl Default for KeyMetrics {
    fn default() -> Self {
        Self {
            hits: 0,
            misses: 0,
            errors: 0,
            timeouts: 0,
            avg_response_time_ms: 0.0,
            last_update: Utc::now(),
        }
    }
}

impl Default for GlobalMetrics {
    fn default() -> Self {
        Self {
            hits: 0,
            misses: 0,
            errors: 0,
            timeouts: 0,
            avg_response_time_ms: 0.0,
            last_update: Utc::now(),
            circuit_breaker_failures: 0,
            circuit_breaker_open: false,
        }
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn ema(current: f64, sample: f64, alpha: f64) -> f64 {
    // First sample seeds the average instead of being dragged toward zero
    if current == 0.0 {
        sample
    } else {
        alpha * sample + (1.0 - alpha) * current
    }
}

impl KeyMetrics {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses + self.errors + self.timeouts
    }

    /// Hit ratio as a percentage
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits, self.total_requests())
    }

    fn count(&mut self, status: CacheStatus) {
        match status {
            CacheStatus::Hit => self.hits += 1,
            CacheStatus::Miss | CacheStatus::Warming => self.misses += 1,
            CacheStatus::Error => self.errors += 1,
            CacheStatus::Timeout => self.timeouts += 1,
        }
    }
}

impl GlobalMetrics {
    pub fn total_requests(&self) -> u64 {
        self.hits + self.misses + self.errors + self.timeouts
    }

    /// Hit ratio as a percentage
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits, self.total_requests())
    }

    /// Errors and timeouts as a percentage of all requests
    pub fn failure_ratio(&self) -> f64 {
        ratio(self.errors + self.timeouts, self.total_requests())
    }

    fn count(&mut self, status: CacheStatus) {
        match status {
            CacheStatus::Hit => self.hits += 1,
            CacheStatus::Miss | CacheStatus::Warming => self.misses += 1,
            CacheStatus::Error => self.errors += 1,
            CacheStatus::Timeout => self.timeouts += 1,
        }
    }
}

#[derive(Debug, Default)]
struct MetricsData {
    global: GlobalMetrics,
    keys: HashMap<String, KeyMetrics>,
}

/// Shared metrics store.
///
/// Key entries are created lazily on first observation and never removed;
/// the key space is the finite set of dashboard keys.
#[derive(Debug, Default)]
pub struct MetricsStore {
    data: RwLock<MetricsData>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one terminal classification.
    ///
    /// `elapsed` is `None` when the backend was never contacted (circuit
    /// short-circuit); such calls are counted but do not move the averages.
    pub async fn record(&self, key: &str, status: CacheStatus, elapsed: Option<Duration>) {
        let now = Utc::now();
        let mut data = self.data.write().await;

        let entry = data.keys.entry(key.to_string()).or_default();
        entry.count(status);
        if let (CacheStatus::Hit, Some(elapsed)) = (status, elapsed) {
            entry.avg_response_time_ms = ema(
                entry.avg_response_time_ms,
                elapsed.as_secs_f64() * 1000.0,
                KEY_EMA_ALPHA,
            );
        }
        entry.last_update = now;

        let global = &mut data.global;
        global.count(status);
        if let Some(elapsed) = elapsed {
            global.avg_response_time_ms = ema(
                global.avg_response_time_ms,
                elapsed.as_secs_f64() * 1000.0,
                GLOBAL_EMA_ALPHA,
            );
        }
        global.last_update = now;
    }

    pub async fn key_metrics(&self, key: &str) -> Option<KeyMetrics> {
        self.data.read().await.keys.get(key).cloned()
    }

    pub async fn all_key_metrics(&self) -> HashMap<String, KeyMetrics> {
        self.data.read().await.keys.clone()
    }

    /// Global counters; breaker fields are left for the caller to fill
    pub async fn global_metrics(&self) -> GlobalMetrics {
        self.data.read().await.global.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_key_entries_created_lazily() {
        let store = MetricsStore::new();
        assert!(store.key_metrics("market:overview").await.is_none());

        store
            .record("market:overview", CacheStatus::Miss, Some(Duration::from_millis(3)))
            .await;
        let metrics = store.key_metrics("market:overview").await.unwrap();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 0);
    }

    #[tokio::test]
    async fn test_counters_per_status() {
        let store = MetricsStore::new();
        store.record("k", CacheStatus::Hit, Some(Duration::from_millis(10))).await;
        store.record("k", CacheStatus::Error, None).await;
        store.record("k", CacheStatus::Timeout, Some(Duration::from_millis(500))).await;
        store.record("k", CacheStatus::Warming, Some(Duration::from_millis(1))).await;

        let key = store.key_metrics("k").await.unwrap();
        assert_eq!((key.hits, key.misses, key.errors, key.timeouts), (1, 1, 1, 1));
        assert_eq!(key.hit_ratio(), 25.0);

        let global = store.global_metrics().await;
        assert_eq!(global.total_requests(), 4);
        assert_eq!(global.failure_ratio(), 50.0);
    }

    #[tokio::test]
    async fn test_key_ema_tracks_hits_only() {
        let store = MetricsStore::new();
        store.record("k", CacheStatus::Hit, Some(Duration::from_millis(100))).await;
        store.record("k", CacheStatus::Hit, Some(Duration::from_millis(200))).await;
        // Slow miss does not move the per-key average
        store.record("k", CacheStatus::Miss, Some(Duration::from_millis(900))).await;

        let key = store.key_metrics("k").await.unwrap();
        assert!((key.avg_response_time_ms - 120.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_global_ema_uses_smaller_alpha() {
        let store = MetricsStore::new();
        store.record("a", CacheStatus::Hit, Some(Duration::from_millis(100))).await;
        store.record("b", CacheStatus::Miss, Some(Duration::from_millis(200))).await;
        store.record("c", CacheStatus::Error, None).await;

        let global = store.global_metrics().await;
        assert!((global.avg_response_time_ms - 110.0).abs() < 1e-6);
        assert_eq!(store.all_key_metrics().await.len(), 3);
    }
}
