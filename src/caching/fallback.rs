// Fallback / Validation Adapter
// Consumer-facing reads that always produce a usable, bounds-checked value

use super::payloads::{
    is_placeholder_value, placeholder_value, validate_value, DashboardData, DataType, MarketOverview, SignalBoard,
    TopMovers,
};
use super::retrieval::RetrievalClient;
use super::warming::WarmingScheduler;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const OVERVIEW_KEY: &str = "market:overview";
pub const SIGNALS_KEY: &str = "signals:top";
pub const MOVERS_KEY: &str = "movers:top";

/// Primary key to ordered alternates. Read-only once the service is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FallbackChains {
    chains: HashMap<String, Vec<String>>,
}

impl Default for FallbackChains {
    fn default() -> Self {
        let mut chains = Self::empty();
        chains.insert(OVERVIEW_KEY, ["dashboard:overview", "market:summary", "overview"]);
        chains.insert(SIGNALS_KEY, ["dashboard:signals", "signals:latest", "signals"]);
        chains.insert(MOVERS_KEY, ["dashboard:movers", "market:movers", "movers"]);
        chains
    }
}

impl FallbackChains {
    pub fn empty() -> Self {
        Self {
            chains: HashMap::new(),
        }
    }

    pub fn insert<I, S>(&mut self, primary: &str, alternates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chains.insert(
            primary.to_string(),
            alternates.into_iter().map(Into::into).collect(),
        );
    }

    /// Alternates for `primary`, empty when none are configured
    pub fn alternates(&self, primary: &str) -> &[String] {
        self.chains.get(primary).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.chains.iter()
    }
}

/// Adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Critical warm is forced when the warmer has not run for this long
    pub warmup_interval_seconds: u64,
    /// Longest a read waits on a forced critical warm
    pub warmup_budget_ms: u64,
    /// Budget for each alternate read
    pub alternate_timeout_ms: u64,
    /// Budget for the primary read
    pub primary_timeout_ms: u64,
    pub chains: FallbackChains,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            warmup_interval_seconds: 300,
            warmup_budget_ms: 2000,
            alternate_timeout_ms: 1000,
            primary_timeout_ms: 2000,
            chains: FallbackChains::default(),
        }
    }
}

impl FallbackConfig {
    pub fn warmup_interval(&self) -> Duration {
        Duration::from_secs(self.warmup_interval_seconds)
    }

    pub fn warmup_budget(&self) -> Duration {
        Duration::from_millis(self.warmup_budget_ms)
    }

    pub fn alternate_timeout(&self) -> Duration {
        Duration::from_millis(self.alternate_timeout_ms)
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_millis(self.primary_timeout_ms)
    }
}

/// The only layer that fabricates data. Every fabricated value carries the
/// `fallback_data` status tag.
pub struct FallbackAdapter {
    client: Arc<RetrievalClient>,
    warmer: Option<Arc<WarmingScheduler>>,
    config: FallbackConfig,
}

impl FallbackAdapter {
    pub fn new(
        client: Arc<RetrievalClient>,
        warmer: Option<Arc<WarmingScheduler>>,
        config: FallbackConfig,
    ) -> Self {
        Self {
            client,
            warmer,
            config,
        }
    }

    pub fn config(&self) -> &FallbackConfig {
        &self.config
    }

    /// Read `key`, falling back through its chain and finally to a placeholder
    pub async fn get_with_fallback(&self, key: &str, default: Value, data_type: DataType) -> Value {
        self.ensure_warmed().await;

        let (value, status) = self
            .client
            .get(key, default.clone(), self.config.primary_timeout())
            .await;

        // A placeholder primary is served only when no alternate is usable
        let mut placeholder_primary = None;
        if status.is_hit() {
            match validate_value(data_type, &value) {
                Ok(()) if is_placeholder_value(&value) => {
                    debug!("Primary {} holds placeholder data, trying alternates", key);
                    placeholder_primary = Some(value);
                }
                Ok(()) => return value,
                Err(e) => warn!("Discarding {} from cache: {}", key, e),
            }
        } else {
            debug!("Primary read of {} returned {}", key, status);
        }

        if let Some(value) = self.read_alternates(key, data_type).await {
            return value;
        }
        if let Some(value) = placeholder_primary {
            return value;
        }

        warn!("No usable data for {}, serving placeholder", key);
        placeholder_value(data_type, &default)
    }

    pub async fn get_overview(&self) -> MarketOverview {
        self.get_typed(OVERVIEW_KEY).await
    }

    pub async fn get_signals(&self) -> SignalBoard {
        self.get_typed(SIGNALS_KEY).await
    }

    pub async fn get_movers(&self) -> TopMovers {
        self.get_typed(MOVERS_KEY).await
    }

    async fn get_typed<T: DashboardData>(&self, key: &str) -> T {
        let value = self.get_with_fallback(key, json!({}), T::DATA_TYPE).await;
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("{} did not decode as {}: {}", key, T::DATA_TYPE, e);
            T::placeholder()
        })
    }

    /// Force a critical warm when the warmer has gone stale, waiting at most
    /// `warmup_budget`. The warm runs on its own task and finishes even when
    /// the wait is cut short.
    async fn ensure_warmed(&self) {
        let Some(warmer) = &self.warmer else {
            return;
        };
        let window = self.config.warmup_interval();
        if warmer.ran_within(window).await {
            return;
        }

        info!("Cache warming is stale, warming critical keys");
        let warmer = Arc::clone(warmer);
        let handle = tokio::spawn(async move { warmer.warm_critical_if_stale(window).await });

        let budget = self.config.warmup_budget();
        match tokio::time::timeout(budget, handle).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Critical warm terminated abnormally: {}", e),
            Err(_) => warn!("Critical warm still running after {:?}, reading anyway", budget),
        }
    }

    async fn read_alternates(&self, key: &str, data_type: DataType) -> Option<Value> {
        for alternate in self.config.chains.alternates(key) {
            let (value, status) = self
                .client
                .get(alternate, Value::Null, self.config.alternate_timeout())
                .await;
            if !status.is_hit() {
                continue;
            }
            match validate_value(data_type, &value) {
                Ok(()) => {
                    info!("Serving {} from alternate {}", key, alternate);
                    return Some(value);
                }
                Err(e) => debug!("Alternate {} for {} rejected: {}", alternate, key, e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chains() {
        let chains = FallbackChains::default();
        assert_eq!(chains.len(), 3);
        assert_eq!(
            chains.alternates(OVERVIEW_KEY),
            ["dashboard:overview", "market:summary", "overview"]
        );
        assert!(chains.alternates("volume:leaders").is_empty());
    }

    #[test]
    fn test_chains_serialize_as_plain_table() {
        let mut chains = FallbackChains::empty();
        chains.insert("a", ["b", "c"]);
        let value = serde_json::to_value(&chains).unwrap();
        assert_eq!(value, json!({ "a": ["b", "c"] }));
    }

    #[test]
    fn test_fallback_config_defaults() {
        let config = FallbackConfig::default();
        assert_eq!(config.warmup_interval(), Duration::from_secs(300));
        assert_eq!(config.warmup_budget(), Duration::from_secs(2));
        assert_eq!(config.alternate_timeout(), Duration::from_secs(1));
        assert_eq!(config.primary_timeout(), Duration::from_secs(2));
    }
}
