pub mod circuit_breaker;
pub mod error;
pub mod logging;
