// Resilient Cache Layer for the Dashboard
// Retrieval with retries and circuit breaking, background warming, fallback chains and health reporting

use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod fallback;
pub mod health;
pub mod memory_cache;
pub mod metrics;
pub mod payloads;
pub mod redis_cache;
pub mod retrieval;
pub mod warming;


pub use fallback::{FallbackAdapter, FallbackChains};
pub use health::{HealthReport, HealthReporter, HealthStatus};
pub use memory_cache::MemoryBackend;
pub use metrics::{GlobalMetrics, KeyMetrics, MetricsStore};
pub use payloads::{DashboardData, DataType, MarketOverview, SignalBoard, TopMovers};
pub use redis_cache::{RedisBackend, RedisCacheConfig};
pub use retrieval::RetrievalClient;
pub use warming::{PopulationSource, WarmingScheduler, WarmingTask};

/// Byte-oriented key-value store the dashboard data lives in.
///
/// Implementations do no retrying of their own; retry policy belongs to the
/// [`RetrievalClient`].
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs and health output
    fn name(&self) -> &str;

    /// Read raw bytes; `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write raw bytes with a time-to-live in seconds
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Cheap liveness check
    async fn ping(&self) -> Result<()>;
}

/// Outcome of a single retrieval call. Exactly one is produced per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    Hit,
    Miss,
    Error,
    Timeout,
    Warming,
}

impl CacheStatus {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheStatus::Hit)
    }

    /// Statuses after which the adapter walks the fallback chain
    pub fn needs_fallback(&self) -> bool {
        !self.is_hit()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Error => "error",
            CacheStatus::Timeout => "timeout",
            CacheStatus::Warming => "warming",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only metrics export for monitoring collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub global_metrics: GlobalMetrics,
    pub key_metrics: HashMap<String, KeyMetrics>,
    pub warming: warming::WarmingStats,
}
