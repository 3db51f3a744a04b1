// Cache Health Reporter
// Connectivity probe, critical-key reads and breaker state folded into one verdict

use super::fallback::{MOVERS_KEY, OVERVIEW_KEY, SIGNALS_KEY};
use super::metrics::GlobalMetrics;
use super::retrieval::RetrievalClient;
use super::CacheStatus;
use crate::utils::circuit_breaker::{CircuitBreakerStats, CircuitState};
use crate::utils::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Overall or per-check verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// The check itself did not complete
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health reporter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Keys whose presence is reported individually
    pub critical_keys: Vec<String>,
    /// Key written and read back by the connectivity probe
    pub probe_key: String,
    pub probe_ttl_seconds: u64,
    /// Budget for each probe step and each critical-key read
    pub key_timeout_ms: u64,
    /// Budget for the whole evaluation
    pub check_timeout_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            critical_keys: vec![
                OVERVIEW_KEY.to_string(),
                SIGNALS_KEY.to_string(),
                MOVERS_KEY.to_string(),
            ],
            probe_key: "health:probe".to_string(),
            probe_ttl_seconds: 60,
            key_timeout_ms: 1000,
            check_timeout_seconds: 10,
        }
    }
}

impl HealthConfig {
    pub fn key_timeout(&self) -> Duration {
        Duration::from_millis(self.key_timeout_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_seconds)
    }
}

/// Probe round trip result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectivityCheck {
    pub status: HealthStatus,
    pub round_trip_ms: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalKeyCheck {
    pub status: CacheStatus,
    pub has_data: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthChecks {
    pub connectivity: ConnectivityCheck,
    pub critical_keys: BTreeMap<String, CriticalKeyCheck>,
    pub circuit_breaker: CircuitBreakerStats,
}

/// Read-only health export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Absent when the evaluation did not complete
    pub checks: Option<HealthChecks>,
    pub performance: GlobalMetrics,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Overall verdict from connectivity and breaker state
pub fn overall_status(connectivity: HealthStatus, breaker: CircuitState) -> HealthStatus {
    match (connectivity, breaker) {
        (HealthStatus::Healthy, CircuitState::Closed) => HealthStatus::Healthy,
        (HealthStatus::Healthy, CircuitState::Open) => HealthStatus::Degraded,
        _ => HealthStatus::Unhealthy,
    }
}

pub struct HealthReporter {
    client: Arc<RetrievalClient>,
    config: HealthConfig,
}

impl HealthReporter {
    pub fn new(client: Arc<RetrievalClient>, config: HealthConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Run every check; never fails
    pub async fn health_check(&self) -> HealthReport {
        let budget = self.config.check_timeout();
        match tokio::time::timeout(budget, self.evaluate()).await {
            Ok(report) => report,
            Err(_) => {
                error!("Health check did not finish within {:?}", budget);
                HealthReport {
                    status: HealthStatus::Error,
                    checks: None,
                    performance: self.client.global_metrics().await,
                    timestamp: Utc::now(),
                    error: Some(CacheError::timeout(budget).to_string()),
                }
            }
        }
    }

    async fn evaluate(&self) -> HealthReport {
        let connectivity = self.check_connectivity().await;
        let critical_keys = self.check_critical_keys().await;
        let circuit_breaker = self.client.breaker().get_stats().await;

        let status = overall_status(connectivity.status, circuit_breaker.state);
        if status != HealthStatus::Healthy {
            warn!("Cache health is {}", status);
        }

        HealthReport {
            status,
            checks: Some(HealthChecks {
                connectivity,
                critical_keys,
                circuit_breaker,
            }),
            performance: self.client.global_metrics().await,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Write a fresh token, read it back and compare
    pub async fn check_connectivity(&self) -> ConnectivityCheck {
        let started = Instant::now();
        let token = uuid::Uuid::new_v4().to_string();

        let result = self.probe(&token).await;
        let round_trip_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, error) = match result {
            Ok(true) => (HealthStatus::Healthy, None),
            Ok(false) => (
                HealthStatus::Degraded,
                Some("probe value did not round-trip".to_string()),
            ),
            Err(e) => {
                warn!("Connectivity probe failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };

        debug!("Connectivity probe: {} in {:.1}ms", status, round_trip_ms);
        ConnectivityCheck {
            status,
            round_trip_ms,
            error,
        }
    }

    async fn probe(&self, token: &str) -> Result<bool> {
        let backend = self.client.backend();
        let wait = self.config.key_timeout();
        let key = &self.config.probe_key;

        tokio::time::timeout(
            wait,
            backend.set(key, token.as_bytes(), self.config.probe_ttl_seconds),
        )
        .await
        .map_err(|_| CacheError::timeout(wait))??;

        let read = tokio::time::timeout(wait, backend.get(key))
            .await
            .map_err(|_| CacheError::timeout(wait))??;

        Ok(read.as_deref() == Some(token.as_bytes()))
    }

    async fn check_critical_keys(&self) -> BTreeMap<String, CriticalKeyCheck> {
        let mut checks = BTreeMap::new();
        for key in &self.config.critical_keys {
            let (value, status) = self
                .client
                .get(key, Value::Null, self.config.key_timeout())
                .await;
            checks.insert(
                key.clone(),
                CriticalKeyCheck {
                    status,
                    has_data: status.is_hit() && !value.is_null(),
                },
            );
        }
        checks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_table() {
        assert_eq!(
            overall_status(HealthStatus::Healthy, CircuitState::Closed),
            HealthStatus::Healthy
        );
        assert_eq!(
            overall_status(HealthStatus::Healthy, CircuitState::Open),
            HealthStatus::Degraded
        );
        assert_eq!(
            overall_status(HealthStatus::Degraded, CircuitState::Closed),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            overall_status(HealthStatus::Unhealthy, CircuitState::Open),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthStatus::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
        assert_eq!(HealthStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_default_critical_keys() {
        let config = HealthConfig::default();
        assert_eq!(config.critical_keys.len(), 3);
        assert_eq!(config.probe_key, "health:probe");
        assert_eq!(config.check_timeout(), Duration::from_secs(10));
    }
}
