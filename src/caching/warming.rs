// Cache Warming Scheduler
// Priority-ordered background refresh of dashboard keys with per-task pause and a
// three-step population chain: source endpoint, fallback-chain copy, placeholder

use super::fallback::FallbackChains;
use super::payloads::{is_placeholder_value, placeholder_value, validate_value, DataType};
use super::retrieval::RetrievalClient;
use super::CacheStatus;
use crate::utils::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const MIN_SOURCE_TIMEOUT_MS: u64 = 1000;
const MAX_SOURCE_TIMEOUT_MS: u64 = 3000;

/// Warming configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    /// Seconds between scheduler ticks
    pub tick_seconds: u64,
    /// Tasks executed per tick
    pub max_concurrent: usize,
    /// Consecutive failures after which a task is paused
    pub pause_threshold: u32,
    /// Seconds a paused task sits out after its last attempt
    pub pause_seconds: u64,
    /// Priorities at or below this value are warmed at startup
    pub critical_priority: u32,
    /// TTL for synthesized placeholder values
    pub placeholder_ttl_seconds: u64,
    /// Timeout for chain reads when copying from an alternate key
    pub alternate_timeout_ms: u64,
    /// Base URL of the analytics API that produces the source-of-truth values
    pub source_base_url: Option<String>,
    /// Static priority table
    pub tasks: Vec<WarmingTaskConfig>,
}

/// One row of the priority table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmingTaskConfig {
    pub key: String,
    /// 1 is the highest priority
    pub priority: u32,
    pub interval_seconds: u64,
    pub data_type: DataType,
    /// Path under `source_base_url`, or an absolute URL
    pub source_path: Option<String>,
    pub source_timeout_ms: u64,
    pub ttl_seconds: u64,
}

impl WarmingTaskConfig {
    fn new(key: &str, priority: u32, interval_seconds: u64, data_type: DataType, path: &str) -> Self {
        Self {
            key: key.to_string(),
            priority,
            interval_seconds,
            data_type,
            source_path: Some(path.to_string()),
            source_timeout_ms: if priority <= 2 { 2000 } else { 3000 },
            ttl_seconds: interval_seconds * 3,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    /// Source timeout clamped to the 1-3 second window
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(
            self.source_timeout_ms
                .clamp(MIN_SOURCE_TIMEOUT_MS, MAX_SOURCE_TIMEOUT_MS),
        )
    }
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 30,
            max_concurrent: 5,
            pause_threshold: 3,
            pause_seconds: 60,
            critical_priority: 2,
            placeholder_ttl_seconds: 30,
            alternate_timeout_ms: 1000,
            source_base_url: Some("http://localhost:8000".to_string()),
            tasks: default_tasks(),
        }
    }
}

/// The dashboard's priority table
pub fn default_tasks() -> Vec<WarmingTaskConfig> {
    vec![
        WarmingTaskConfig::new("market:overview", 1, 60, DataType::Overview, "/api/market/overview"),
        WarmingTaskConfig::new("signals:top", 1, 60, DataType::Signals, "/api/signals/top"),
        WarmingTaskConfig::new("movers:top", 2, 120, DataType::Movers, "/api/market/movers"),
        WarmingTaskConfig::new("volume:leaders", 2, 180, DataType::Generic, "/api/volume/leaders"),
        WarmingTaskConfig::new("sentiment:summary", 3, 300, DataType::Generic, "/api/sentiment/summary"),
        WarmingTaskConfig::new("orderflow:summary", 3, 300, DataType::Generic, "/api/orderflow/summary"),
        WarmingTaskConfig::new("market:regime", 4, 600, DataType::Generic, "/api/market/regime"),
    ]
}

impl WarmingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn pause_duration(&self) -> Duration {
        Duration::from_secs(self.pause_seconds)
    }

    pub fn alternate_timeout(&self) -> Duration {
        Duration::from_millis(self.alternate_timeout_ms)
    }
}

/// Runtime state of one warming task. The task set is fixed for the
/// scheduler's lifetime.
#[derive(Debug, Clone)]
pub struct WarmingTask {
    pub spec: WarmingTaskConfig,
    pub last_warmed: Option<Instant>,
    pub last_attempt: Option<Instant>,
    pub consecutive_failures: u32,
}

impl WarmingTask {
    pub fn new(spec: WarmingTaskConfig) -> Self {
        Self {
            spec,
            last_warmed: None,
            last_attempt: None,
            consecutive_failures: 0,
        }
    }

    /// Refresh interval has elapsed (never-warmed tasks are always due)
    pub fn is_due(&self, now: Instant) -> bool {
        self.last_warmed
            .map_or(true, |at| now.saturating_duration_since(at) >= self.spec.interval())
    }

    /// Failing repeatedly and attempted too recently
    pub fn is_paused(&self, now: Instant, threshold: u32, pause: Duration) -> bool {
        self.consecutive_failures >= threshold
            && self
                .last_attempt
                .map_or(false, |at| now.saturating_duration_since(at) < pause)
    }

    pub fn is_eligible(&self, now: Instant, threshold: u32, pause: Duration) -> bool {
        self.is_due(now) && !self.is_paused(now, threshold, pause)
    }

    fn record(&mut self, outcome: WarmOutcome, now: Instant) {
        self.last_attempt = Some(now);
        if outcome.is_success() {
            self.last_warmed = Some(now);
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }
}

/// Which population step satisfied a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmOutcome {
    /// Fresh value from the source endpoint
    Source,
    /// Copied from a fallback-chain alternate
    FallbackCopy,
    /// Placeholder written
    Placeholder,
    /// Real data was already present; placeholder write skipped
    Retained,
    Failed,
}

impl WarmOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, WarmOutcome::Failed)
    }
}

/// Source-of-truth endpoint for warming tasks
#[async_trait::async_trait]
pub trait PopulationSource: Send + Sync {
    /// Fetch a JSON object, failing on non-200, non-object bodies or timeout
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Value>;
}

/// Population source backed by the analytics HTTP API
pub struct HttpPopulationSource {
    client: reqwest::Client,
}

impl HttpPopulationSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dashboard-cache/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl PopulationSource for HttpPopulationSource {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Value> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(CacheError::source(url, &format!("HTTP {}", response.status())));
        }
        let body: Value = response.json().await?;
        if !body.is_object() {
            return Err(CacheError::source(url, "response is not a JSON object"));
        }
        Ok(body)
    }
}

/// Warming counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmingStats {
    pub cycles: u64,
    pub cycles_skipped: u64,
    pub tasks_warmed: u64,
    pub tasks_failed: u64,
    pub source_refreshes: u64,
    pub fallback_copies: u64,
    pub placeholder_writes: u64,
    pub last_cycle: Option<DateTime<Utc>>,
    pub last_critical_warm: Option<DateTime<Utc>>,
}

impl WarmingStats {
    fn count(&mut self, outcome: WarmOutcome) {
        match outcome {
            WarmOutcome::Source => self.source_refreshes += 1,
            WarmOutcome::FallbackCopy => self.fallback_copies += 1,
            WarmOutcome::Placeholder => self.placeholder_writes += 1,
            WarmOutcome::Retained | WarmOutcome::Failed => {}
        }
        if outcome.is_success() {
            self.tasks_warmed += 1;
        } else {
            self.tasks_failed += 1;
        }
    }
}

/// Result of one warming pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub outcomes: Vec<(String, WarmOutcome)>,
    /// Skipped because the circuit breaker was open
    pub skipped: bool,
}

impl CycleReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Operator view of a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmingTaskStatus {
    pub key: String,
    pub priority: u32,
    pub due: bool,
    pub paused: bool,
    pub consecutive_failures: u32,
    pub seconds_since_warmed: Option<u64>,
}

/// Background warmer.
///
/// Writes straight to the backend through the retrieval client and never
/// calls back into the fallback adapter. Cycles and critical warms hold
/// `pass_lock`, so at most one pass runs at a time.
pub struct WarmingScheduler {
    client: Arc<RetrievalClient>,
    source: Arc<dyn PopulationSource>,
    chains: FallbackChains,
    config: WarmingConfig,
    tasks: RwLock<Vec<WarmingTask>>,
    stats: RwLock<WarmingStats>,
    last_run: RwLock<Option<Instant>>,
    pass_lock: Mutex<()>,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wakeup: Notify,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WarmingScheduler {
    pub fn new(
        client: Arc<RetrievalClient>,
        source: Arc<dyn PopulationSource>,
        chains: FallbackChains,
        config: WarmingConfig,
    ) -> Self {
        let tasks = config.tasks.iter().cloned().map(WarmingTask::new).collect();
        Self {
            client,
            source,
            chains,
            config,
            tasks: RwLock::new(tasks),
            stats: RwLock::new(WarmingStats::default()),
            last_run: RwLock::new(None),
            pass_lock: Mutex::new(()),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wakeup: Notify::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// When a cycle or critical warm last completed
    pub async fn last_run(&self) -> Option<Instant> {
        *self.last_run.read().await
    }

    pub async fn ran_within(&self, window: Duration) -> bool {
        self.last_run()
            .await
            .map_or(false, |at| at.elapsed() < window)
    }

    pub async fn stats(&self) -> WarmingStats {
        self.stats.read().await.clone()
    }

    pub async fn warming_status(&self) -> Vec<WarmingTaskStatus> {
        let now = Instant::now();
        let tasks = self.tasks.read().await;
        tasks
            .iter()
            .map(|t| WarmingTaskStatus {
                key: t.spec.key.clone(),
                priority: t.spec.priority,
                due: t.is_due(now),
                paused: t.is_paused(now, self.config.pause_threshold, self.config.pause_duration()),
                consecutive_failures: t.consecutive_failures,
                seconds_since_warmed: t
                    .last_warmed
                    .map(|at| now.saturating_duration_since(at).as_secs()),
            })
            .collect()
    }

    /// Eligible tasks, highest priority first, truncated to the concurrency limit
    pub async fn select_due_tasks(&self) -> Vec<WarmingTaskConfig> {
        let now = Instant::now();
        let tasks = self.tasks.read().await;
        let mut eligible: Vec<&WarmingTask> = tasks
            .iter()
            .filter(|t| t.is_eligible(now, self.config.pause_threshold, self.config.pause_duration()))
            .collect();
        eligible.sort_by_key(|t| t.spec.priority);
        eligible
            .into_iter()
            .take(self.config.max_concurrent)
            .map(|t| t.spec.clone())
            .collect()
    }

    /// One scheduler tick
    pub async fn run_cycle(&self) -> CycleReport {
        if self.client.breaker().is_open().await {
            warn!("Circuit breaker open, skipping warming cycle");
            self.stats.write().await.cycles_skipped += 1;
            return CycleReport {
                outcomes: Vec::new(),
                skipped: true,
            };
        }

        let _pass = self.pass_lock.lock().await;
        let selected = self.select_due_tasks().await;
        debug!("Warming cycle selected {} tasks", selected.len());
        let report = self.warm_tasks(selected).await;

        {
            let mut stats = self.stats.write().await;
            stats.cycles += 1;
            stats.last_cycle = Some(Utc::now());
        }
        *self.last_run.write().await = Some(Instant::now());

        if report.failed() > 0 {
            warn!(
                "Warming cycle finished: {} warmed, {} failed",
                report.succeeded(),
                report.failed()
            );
        } else if !report.outcomes.is_empty() {
            info!("Warming cycle finished: {} warmed", report.succeeded());
        }
        report
    }

    /// Warm every critical task now, regardless of interval.
    ///
    /// Awaited once at startup before traffic is accepted.
    pub async fn warm_critical_data(&self) -> CycleReport {
        let _pass = self.pass_lock.lock().await;
        self.critical_pass().await
    }

    /// Critical warm for readers that found warming stale.
    ///
    /// Returns `None` when a pass completed within `window` while this caller
    /// waited for the lock, so concurrent readers share one warm.
    pub async fn warm_critical_if_stale(&self, window: Duration) -> Option<CycleReport> {
        let _pass = self.pass_lock.lock().await;
        if self.ran_within(window).await {
            debug!("Critical warm already done by another caller");
            return None;
        }
        Some(self.critical_pass().await)
    }

    async fn critical_pass(&self) -> CycleReport {
        if self.client.breaker().is_open().await {
            warn!("Circuit breaker open, skipping critical warm");
            return CycleReport {
                outcomes: Vec::new(),
                skipped: true,
            };
        }

        let now = Instant::now();
        let selected: Vec<WarmingTaskConfig> = {
            let tasks = self.tasks.read().await;
            tasks
                .iter()
                .filter(|t| t.spec.priority <= self.config.critical_priority)
                .filter(|t| !t.is_paused(now, self.config.pause_threshold, self.config.pause_duration()))
                .map(|t| t.spec.clone())
                .collect()
        };

        info!("Warming {} critical keys", selected.len());
        let report = self.warm_tasks(selected).await;

        self.stats.write().await.last_critical_warm = Some(Utc::now());
        *self.last_run.write().await = Some(Instant::now());
        report
    }

    async fn warm_tasks(&self, selected: Vec<WarmingTaskConfig>) -> CycleReport {
        let results = join_all(selected.iter().map(|spec| self.warm_task(spec))).await;

        let now = Instant::now();
        let mut outcomes = Vec::with_capacity(results.len());
        {
            let mut tasks = self.tasks.write().await;
            let mut stats = self.stats.write().await;
            for (spec, outcome) in selected.iter().zip(results) {
                if let Some(task) = tasks.iter_mut().find(|t| t.spec.key == spec.key) {
                    task.record(outcome, now);
                    if task.consecutive_failures >= self.config.pause_threshold {
                        error!(
                            "Warming {} failed {} times in a row, pausing for {}s",
                            spec.key, task.consecutive_failures, self.config.pause_seconds
                        );
                    }
                }
                stats.count(outcome);
                outcomes.push((spec.key.clone(), outcome));
            }
        }

        CycleReport {
            outcomes,
            skipped: false,
        }
    }

    /// Run the population chain for one task, stopping at the first success
    async fn warm_task(&self, spec: &WarmingTaskConfig) -> WarmOutcome {
        let _in_flight = self.client.in_flight().mark(&spec.key);

        match self.populate_from_source(spec).await {
            Ok(true) => return WarmOutcome::Source,
            Ok(false) => {}
            Err(e) => debug!("Source refresh of {} failed: {}", spec.key, e),
        }

        if self.copy_from_chain(spec).await {
            return WarmOutcome::FallbackCopy;
        }

        match self.write_placeholder(spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("All warming strategies failed for {}: {}", spec.key, e);
                WarmOutcome::Failed
            }
        }
    }

    fn source_url(&self, spec: &WarmingTaskConfig) -> Option<String> {
        let path = spec.source_path.as_deref()?;
        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(path.to_string());
        }
        let base = self.config.source_base_url.as_deref()?;
        Some(format!("{}{}", base.trim_end_matches('/'), path))
    }

    /// `Ok(false)` when the task has no source configured
    async fn populate_from_source(&self, spec: &WarmingTaskConfig) -> Result<bool> {
        let Some(url) = self.source_url(spec) else {
            return Ok(false);
        };
        let value = self.source.fetch(&url, spec.source_timeout()).await?;
        validate_value(spec.data_type, &value)?;
        self.client.put(&spec.key, &value, spec.ttl_seconds).await?;
        debug!("Warmed {} from {}", spec.key, url);
        Ok(true)
    }

    async fn copy_from_chain(&self, spec: &WarmingTaskConfig) -> bool {
        for alternate in self.chains.alternates(&spec.key) {
            let (value, status) = self
                .client
                .get(alternate, Value::Null, self.config.alternate_timeout())
                .await;
            if !status.is_hit() || is_placeholder_value(&value) {
                continue;
            }
            if let Err(e) = validate_value(spec.data_type, &value) {
                debug!("Alternate {} for {} rejected: {}", alternate, spec.key, e);
                continue;
            }
            match self.client.put(&spec.key, &value, spec.ttl_seconds).await {
                Ok(()) => {
                    info!("Warmed {} from alternate {}", spec.key, alternate);
                    return true;
                }
                Err(e) => {
                    warn!("Failed to copy {} into {}: {}", alternate, spec.key, e);
                    return false;
                }
            }
        }
        false
    }

    async fn write_placeholder(&self, spec: &WarmingTaskConfig) -> Result<WarmOutcome> {
        // Do not clobber real data that is merely not being refreshed
        let timeout = self.config.alternate_timeout();
        let (existing, status) = self.client.get(&spec.key, Value::Null, timeout).await;
        match status {
            CacheStatus::Hit if !is_placeholder_value(&existing) => {
                debug!("Keeping existing data for {}", spec.key);
                return Ok(WarmOutcome::Retained);
            }
            CacheStatus::Hit | CacheStatus::Miss | CacheStatus::Warming => {}
            CacheStatus::Error => {
                return Err(CacheError::backend(format!(
                    "could not check {} before writing a placeholder",
                    spec.key
                )));
            }
            CacheStatus::Timeout => return Err(CacheError::timeout(timeout)),
        }

        let placeholder = placeholder_value(spec.data_type, &json!({}));
        self.client
            .put(&spec.key, &placeholder, self.config.placeholder_ttl_seconds)
            .await?;
        warn!("Wrote placeholder for {}", spec.key);
        Ok(WarmOutcome::Placeholder)
    }

    /// Spawn the background loop
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Warming scheduler already running");
            return;
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop().await });
        *self.handle.lock().await = Some(handle);
        info!(
            "Warming scheduler started ({} tasks, tick {}s)",
            self.config.tasks.len(),
            self.config.tick_seconds
        );
    }

    async fn run_loop(&self) {
        let tick = self.config.tick();
        while !self.stop_requested.load(Ordering::SeqCst) {
            self.run_cycle().await;
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = self.wakeup.notified() => {}
            }
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Warming scheduler stopped");
    }

    /// Ask the loop to stop and wait for the in-flight tick to finish
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.wakeup.notify_one();

        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Warming loop terminated abnormally: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(priority: u32, interval_seconds: u64) -> WarmingTask {
        WarmingTask::new(WarmingTaskConfig::new(
            "market:overview",
            priority,
            interval_seconds,
            DataType::Overview,
            "/api/market/overview",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_due_after_interval() {
        let mut t = task(1, 60);
        let start = Instant::now();
        assert!(t.is_due(start));

        t.record(WarmOutcome::Source, start);
        assert!(!t.is_due(start + Duration::from_secs(59)));
        assert!(t.is_due(start + Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_pause_window() {
        let pause = Duration::from_secs(60);
        let mut t = task(1, 10);
        let start = Instant::now();

        t.record(WarmOutcome::Failed, start);
        t.record(WarmOutcome::Failed, start);
        assert!(!t.is_paused(start, 3, pause));

        t.record(WarmOutcome::Failed, start);
        assert!(t.is_paused(start + Duration::from_secs(59), 3, pause));
        assert!(!t.is_eligible(start + Duration::from_secs(59), 3, pause));
        assert!(!t.is_paused(start + Duration::from_secs(60), 3, pause));
        assert!(t.is_eligible(start + Duration::from_secs(60), 3, pause));

        t.record(WarmOutcome::Placeholder, start + Duration::from_secs(61));
        assert_eq!(t.consecutive_failures, 0);
    }

    #[test]
    fn test_source_timeout_clamped() {
        let mut spec = task(1, 60).spec;
        spec.source_timeout_ms = 200;
        assert_eq!(spec.source_timeout(), Duration::from_secs(1));
        spec.source_timeout_ms = 10_000;
        assert_eq!(spec.source_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_default_table_is_prioritized() {
        let tasks = default_tasks();
        assert!(tasks.iter().any(|t| t.key == "market:overview" && t.priority == 1));
        let critical = tasks.iter().filter(|t| t.priority <= 2).count();
        assert_eq!(critical, 4);
        assert!(tasks
            .iter()
            .all(|t| t.source_timeout() >= Duration::from_secs(1)
                && t.source_timeout() <= Duration::from_secs(3)));
    }

    #[test]
    fn test_warm_outcome_success() {
        assert!(WarmOutcome::Source.is_success());
        assert!(WarmOutcome::Retained.is_success());
        assert!(!WarmOutcome::Failed.is_success());
    }
}
