use thiserror::Error;

/// Result type alias for the dashboard cache
pub type Result<T> = std::result::Result<T, CacheError>;

/// Error types raised below the retrieval boundary.
///
/// Nothing in here ever reaches a dashboard consumer: the retrieval client
/// folds these into a [`CacheStatus`](crate::caching::CacheStatus) and the
/// fallback adapter folds statuses into data.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cache backend connection or protocol failure
    #[error("Cache backend error: {message}")]
    Backend { message: String },

    /// Per-attempt deadline exceeded
    #[error("Cache operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Circuit breaker refused the call
    #[error("Circuit breaker is open, request refused")]
    CircuitOpen,

    /// Data present but outside realistic bounds
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Population source (HTTP) failure
    #[error("Population source error: {source_name}: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Redis command errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// File system errors
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Cache error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl CacheError {
    /// Create a new backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new population source error
    pub fn source<S: Into<String>>(source_name: S, message: S) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::Backend { .. }
                | CacheError::Timeout { .. }
                | CacheError::Redis(_)
                | CacheError::Http(_)
                | CacheError::Io(_)
        )
    }

    /// Check if this error came from the circuit breaker
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CacheError::CircuitOpen)
    }

    /// Check if this error is a bounds/shape rejection
    pub fn is_validation(&self) -> bool {
        matches!(self, CacheError::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(CacheError::backend("connection reset").is_retryable());
        assert!(CacheError::timeout(Duration::from_millis(250)).is_retryable());
        assert!(!CacheError::CircuitOpen.is_retryable());
        assert!(!CacheError::validation("total_symbols out of range").is_retryable());
        assert!(!CacheError::config("bad").is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = CacheError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Cache operation timed out after 1500ms");

        let err = CacheError::source("market:overview", "HTTP 503");
        assert_eq!(
            err.to_string(),
            "Population source error: market:overview: HTTP 503"
        );
        assert!(CacheError::CircuitOpen.is_circuit_open());
        assert!(CacheError::validation("x").is_validation());
    }
}
