//! # Dashboard Cache
//!
//! Resilient cache retrieval and warming for a crypto market dashboard. Every
//! dashboard read resolves to a usable value, even while the shared cache
//! backend is slow, flaky or down.
//!
//! ## Features
//!
//! - **Retrieval Client**: bounded retries with shrinking per-attempt deadlines
//!   and a `(value, status)` result that never raises
//! - **Circuit Breaker**: stops hammering a failing backend and recovers lazily
//!   after a cooldown
//! - **Warming Scheduler**: priority-ordered background refresh with per-task
//!   pause and a source / fallback-chain / placeholder population chain
//! - **Fallback Adapter**: bounds validation, alternate keys and clearly tagged
//!   placeholders
//! - **Metrics and Health**: per-key and global counters with smoothed latency,
//!   plus a healthy / degraded / unhealthy verdict
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dashboard_cache::{DashboardCacheService, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     dashboard_cache::init().await?;
//!
//!     let service = DashboardCacheService::connect(ServiceConfig::default()).await?;
//!     service.start().await;
//!
//!     let overview = service.get_overview().await;
//!     println!("{} symbols tracked", overview.total_symbols.unwrap_or(0));
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod caching;
pub mod config;
pub mod service;
pub mod utils;

// Re-export main types for convenience
pub use caching::{
    CacheBackend, CacheMetricsSnapshot, CacheStatus, DataType, FallbackAdapter, HealthReport,
    HealthStatus, MarketOverview, MemoryBackend, RedisBackend, RetrievalClient, SignalBoard,
    TopMovers, WarmingScheduler,
};
pub use config::ServiceConfig;
pub use service::DashboardCacheService;
pub use utils::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use utils::error::{CacheError, Result};

/// Initialize the cache subsystem with default logging
pub async fn init() -> Result<()> {
    utils::logging::init_logging()?;
    Ok(())
}

/// Initialize the cache subsystem with custom logging configuration
pub async fn init_with_logging(level: tracing::Level) -> Result<()> {
    utils::logging::init_logging_with_level(level)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init() {
        init().await.unwrap();
    }
}
