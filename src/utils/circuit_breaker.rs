use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Circuit breaker states
///
/// There is no half-open probe state: the first call after the cooldown is a
/// normal attempt and its outcome alone decides whether the breaker reopens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests reach the backend
    Closed,
    /// Requests are short-circuited until the cooldown elapses
    Open,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// Seconds the circuit stays open once tripped
    pub cooldown_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_seconds: 60,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl BreakerState {
    fn is_open_at(&self, threshold: u32, now: Instant) -> bool {
        self.consecutive_failures >= threshold && self.open_until.map_or(false, |until| now < until)
    }
}

/// Shared failure gate for the cache backend.
///
/// Consulted by the retrieval client before every call and by the warming
/// scheduler before every cycle.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: RwLock::new(BreakerState::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether calls are currently being short-circuited.
    ///
    /// The first consultation after the cooldown has elapsed resets the
    /// failure counter and reports the circuit as closed.
    pub async fn is_open(&self) -> bool {
        let now = Instant::now();
        {
            let state = self.state.read().await;
            if state.consecutive_failures < self.config.failure_threshold {
                return false;
            }
            if state.is_open_at(self.config.failure_threshold, now) {
                return true;
            }
        }

        let mut state = self.state.write().await;
        // Re-check under the write lock; a concurrent caller may have reset it already
        if state.is_open_at(self.config.failure_threshold, now) {
            return true;
        }
        if state.consecutive_failures >= self.config.failure_threshold {
            state.consecutive_failures = 0;
            state.open_until = None;
            info!("Circuit breaker cooldown elapsed, closing");
        }
        false
    }

    /// Record a successful backend call.
    ///
    /// Partial self-heal: one success forgives one failure.
    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if state.consecutive_failures > 0 {
            state.consecutive_failures -= 1;
            debug!(
                "Circuit breaker recorded success, failures now {}",
                state.consecutive_failures
            );
        }
    }

    /// Record a failed backend call
    pub async fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        let was_open = state.is_open_at(self.config.failure_threshold, now);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if !was_open && state.consecutive_failures >= self.config.failure_threshold {
            state.open_until = Some(now + self.config.cooldown());
            error!(
                "Circuit breaker opened after {} consecutive failures, cooling down for {}s",
                state.consecutive_failures, self.config.cooldown_seconds
            );
        } else {
            debug!(
                "Circuit breaker recorded failure ({}/{})",
                state.consecutive_failures, self.config.failure_threshold
            );
        }
    }

    /// Get the current state without triggering the lazy reset
    pub async fn get_state(&self) -> CircuitState {
        let state = self.state.read().await;
        if state.is_open_at(self.config.failure_threshold, Instant::now()) {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Get circuit breaker statistics
    pub async fn get_stats(&self) -> CircuitBreakerStats {
        let now = Instant::now();
        let state = self.state.read().await;
        let open = state.is_open_at(self.config.failure_threshold, now);
        CircuitBreakerStats {
            state: if open {
                CircuitState::Open
            } else {
                CircuitState::Closed
            },
            consecutive_failures: state.consecutive_failures,
            failure_threshold: self.config.failure_threshold,
            cooldown_seconds: self.config.cooldown_seconds,
            remaining_cooldown_ms: match state.open_until {
                Some(until) if open => until.saturating_duration_since(now).as_millis() as u64,
                _ => 0,
            },
        }
    }

    /// Reset the circuit breaker to closed state
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        *state = BreakerState::default();
        debug!("Circuit breaker reset to closed state");
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
    pub remaining_cooldown_ms: u64,
}
