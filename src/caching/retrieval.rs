// Cache Retrieval Client
// Bounded retries with shrinking per-attempt deadlines, circuit breaking and status classification

use super::metrics::{GlobalMetrics, KeyMetrics, MetricsStore};
use super::{CacheBackend, CacheStatus};
use crate::utils::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::utils::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Retry and timeout policy for reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First backoff delay in milliseconds, doubled per attempt
    pub base_delay_ms: u64,
    /// Backoff ceiling for empty reads and timeouts
    pub max_retry_delay_ms: u64,
    /// Backoff ceiling for backend errors
    pub error_retry_delay_cap_ms: u64,
    /// Call budget used when the caller has no opinion
    pub default_timeout_ms: u64,
    /// Deadline for a single write
    pub write_timeout_ms: u64,
    /// Legacy keys whose values are plain strings rather than JSON
    pub raw_string_keys: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_retry_delay_ms: 2000,
            error_retry_delay_cap_ms: 1000,
            default_timeout_ms: 5000,
            write_timeout_ms: 1000,
            raw_string_keys: vec!["analysis:latest_text".to_string()],
        }
    }
}

impl RetrievalConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Error backoff ceiling, never above the general ceiling
    pub fn error_retry_delay_cap(&self) -> Duration {
        Duration::from_millis(self.error_retry_delay_cap_ms.min(self.max_retry_delay_ms))
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// `min(base * 2^attempt, cap)`
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(cap)
}

/// Deadline for a 0-indexed attempt: later attempts get stricter budgets
pub fn attempt_deadline(timeout: Duration, attempt: u32) -> Duration {
    timeout / (attempt + 1)
}

/// Keys currently being repopulated by the warming scheduler.
///
/// A read that ends empty for one of these keys is reported as
/// [`CacheStatus::Warming`] instead of a plain miss.
#[derive(Debug, Clone, Default)]
pub struct InFlightKeys {
    keys: Arc<Mutex<HashSet<String>>>,
}

impl InFlightKeys {
    /// Mark `key` in flight until the guard drops
    pub fn mark(&self, key: &str) -> InFlightGuard {
        self.lock().insert(key.to_string());
        InFlightGuard {
            keys: self.clone(),
            key: key.to_string(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct InFlightGuard {
    keys: InFlightKeys,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.lock().remove(&self.key);
    }
}

/// Why an attempt did not produce a hit
enum AttemptFailure {
    Empty,
    TimedOut,
    Failed(CacheError),
}

/// Reads dashboard values from the backend.
///
/// Never fails: every outcome resolves to a `(value, status)` pair and every
/// terminal classification lands in the metrics store.
pub struct RetrievalClient {
    backend: Arc<dyn CacheBackend>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsStore>,
    in_flight: InFlightKeys,
    config: RetrievalConfig,
}

impl RetrievalClient {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsStore>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            backend,
            breaker,
            metrics,
            in_flight: InFlightKeys::default(),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.metrics
    }

    pub fn in_flight(&self) -> &InFlightKeys {
        &self.in_flight
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Read `key`, returning `default` with a non-hit status on any failure
    pub async fn get(&self, key: &str, default: Value, timeout: Duration) -> (Value, CacheStatus) {
        let started = Instant::now();

        if self.breaker.is_open().await {
            debug!("Circuit open, short-circuiting read of {}", key);
            self.metrics.record(key, CacheStatus::Error, None).await;
            return (default, CacheStatus::Error);
        }

        let attempts = self.config.max_retries.saturating_add(1);
        for attempt in 0..attempts {
            let deadline = attempt_deadline(timeout, attempt);

            let failure = match tokio::time::timeout(deadline, self.backend.get(key)).await {
                Ok(Ok(Some(bytes))) if !bytes.is_empty() => match self.decode(key, &bytes) {
                    Ok(value) => {
                        self.breaker.record_success().await;
                        self.metrics
                            .record(key, CacheStatus::Hit, Some(started.elapsed()))
                            .await;
                        return (value, CacheStatus::Hit);
                    }
                    Err(e) => AttemptFailure::Failed(e),
                },
                Ok(Ok(_)) => AttemptFailure::Empty,
                Ok(Err(e)) => AttemptFailure::Failed(e),
                Err(_) => AttemptFailure::TimedOut,
            };

            if attempt + 1 == attempts {
                let status = self.classify(key, failure).await;
                self.metrics.record(key, status, Some(started.elapsed())).await;
                return (default, status);
            }

            let delay = match &failure {
                AttemptFailure::Empty => {
                    debug!("Empty read for {} (attempt {}/{})", key, attempt + 1, attempts);
                    backoff_delay(attempt, self.config.base_delay(), self.config.max_retry_delay())
                }
                AttemptFailure::TimedOut => {
                    warn!(
                        "Read of {} timed out after {:?} (attempt {}/{})",
                        key,
                        deadline,
                        attempt + 1,
                        attempts
                    );
                    backoff_delay(attempt, self.config.base_delay(), self.config.max_retry_delay())
                }
                AttemptFailure::Failed(e) => {
                    warn!(
                        "Read of {} failed: {} (attempt {}/{})",
                        key,
                        e,
                        attempt + 1,
                        attempts
                    );
                    backoff_delay(
                        attempt,
                        self.config.base_delay(),
                        self.config.error_retry_delay_cap(),
                    )
                }
            };
            tokio::time::sleep(delay).await;
        }

        // attempts is at least one, so the loop always returns
        self.metrics.record(key, CacheStatus::Error, None).await;
        (default, CacheStatus::Error)
    }

    /// Read with the configured default budget
    pub async fn get_with_default_timeout(&self, key: &str, default: Value) -> (Value, CacheStatus) {
        self.get(key, default, self.config.default_timeout()).await
    }

    /// Serialize and write a value within the write deadline.
    ///
    /// Refused while the breaker is open. A failed or expired write counts as
    /// one breaker failure.
    pub async fn put(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<()> {
        if self.breaker.is_open().await {
            return Err(CacheError::CircuitOpen);
        }
        let bytes = match (value, self.is_raw_key(key)) {
            (Value::String(s), true) => s.clone().into_bytes(),
            _ => serde_json::to_vec(value)?,
        };

        let deadline = self.config.write_timeout();
        let result = match tokio::time::timeout(deadline, self.backend.set(key, &bytes, ttl_seconds)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::timeout(deadline)),
        };
        if let Err(e) = &result {
            warn!("Write of {} failed: {}", key, e);
            self.breaker.record_failure().await;
        }
        result
    }

    /// Global counters with the breaker state folded in
    pub async fn global_metrics(&self) -> GlobalMetrics {
        let mut global = self.metrics.global_metrics().await;
        let breaker = self.breaker.get_stats().await;
        global.circuit_breaker_failures = breaker.consecutive_failures;
        global.circuit_breaker_open = breaker.state == CircuitState::Open;
        global
    }

    pub async fn key_metrics(&self) -> HashMap<String, KeyMetrics> {
        self.metrics.all_key_metrics().await
    }

    fn is_raw_key(&self, key: &str) -> bool {
        self.config.raw_string_keys.iter().any(|k| k == key)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> Result<Value> {
        if self.is_raw_key(key) {
            return Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    async fn classify(&self, key: &str, failure: AttemptFailure) -> CacheStatus {
        match failure {
            AttemptFailure::Empty => {
                if self.in_flight.contains(key) {
                    debug!("Miss on {} while it is being warmed", key);
                    CacheStatus::Warming
                } else {
                    CacheStatus::Miss
                }
            }
            AttemptFailure::TimedOut => {
                warn!("Read of {} exhausted retries on timeouts", key);
                self.breaker.record_failure().await;
                CacheStatus::Timeout
            }
            AttemptFailure::Failed(e) => {
                warn!("Read of {} exhausted retries: {}", key, e);
                self.breaker.record_failure().await;
                CacheStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_sequence() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_secs(2);
        let delays: Vec<_> = (0..8).map(|i| backoff_delay(i, base, cap)).collect();

        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[4], Duration::from_millis(1600));
        assert_eq!(delays[5], cap);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= cap));
    }

    #[test]
    fn test_backoff_delay_does_not_overflow() {
        let d = backoff_delay(64, Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(d, Duration::from_secs(1));
    }

    #[test]
    fn test_attempt_deadline_shrinks() {
        let timeout = Duration::from_millis(1200);
        assert_eq!(attempt_deadline(timeout, 0), Duration::from_millis(1200));
        assert_eq!(attempt_deadline(timeout, 1), Duration::from_millis(600));
        assert_eq!(attempt_deadline(timeout, 2), Duration::from_millis(400));
        assert_eq!(attempt_deadline(timeout, 3), Duration::from_millis(300));
    }

    #[test]
    fn test_error_cap_never_exceeds_general_cap() {
        let config = RetrievalConfig {
            max_retry_delay_ms: 500,
            error_retry_delay_cap_ms: 1000,
            ..Default::default()
        };
        assert_eq!(config.error_retry_delay_cap(), Duration::from_millis(500));
    }

    #[test]
    fn test_write_timeout_default() {
        let config = RetrievalConfig::default();
        assert_eq!(config.write_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_in_flight_guard_releases_key() {
        let in_flight = InFlightKeys::default();
        {
            let _guard = in_flight.mark("market:overview");
            assert!(in_flight.contains("market:overview"));
        }
        assert!(!in_flight.contains("market:overview"));
    }
}
