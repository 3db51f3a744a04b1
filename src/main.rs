use clap::{Parser, Subcommand};
use colored::*;
use dashboard_cache::caching::HealthStatus;
use dashboard_cache::{CacheStatus, DashboardCacheService, DataType, HealthReport, ServiceConfig};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dashboard-cache")]
#[command(about = "Resilient cache retrieval and warming for the market dashboard")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Redis URL (overrides config and environment)
    #[arg(long)]
    redis_url: Option<String>,

    /// Base URL of the analytics API used to warm keys
    #[arg(long)]
    source_url: Option<String>,

    /// Use the in-process backend instead of Redis
    #[arg(long)]
    memory: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Warm critical keys and keep warming until interrupted
    Serve {
        /// Seconds between health reports
        #[arg(long, default_value = "60")]
        health_interval: u64,
    },

    /// Read a key through the fallback adapter
    Get {
        /// Cache key
        key: String,

        /// Payload type used for validation and placeholders
        #[arg(short, long, default_value = "generic")]
        data_type: DataType,

        /// Skip fallback and show the raw retrieval status
        #[arg(long)]
        raw: bool,
    },

    /// Run a health check
    Health,

    /// Show cache metrics
    Metrics,

    /// Run one warming cycle
    Warm {
        /// Warm only the critical keys
        #[arg(long)]
        critical: bool,
    },

    /// Write a default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "dashboard-cache.toml")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    if cli.json_logs {
        dashboard_cache::utils::logging::init_json_logging(log_level)?;
    } else {
        dashboard_cache::init_with_logging(log_level).await?;
    }

    if let Commands::Init { output } = &cli.command {
        return run_init(output);
    }

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        ServiceConfig::from_file(config_path)?
    } else {
        ServiceConfig::default()
    };
    config.apply_env_overrides();
    if let Some(redis_url) = cli.redis_url {
        config = config.with_redis_url(redis_url);
    }
    if let Some(source_url) = cli.source_url {
        config = config.with_source_base_url(source_url);
    }

    let service = if cli.memory {
        DashboardCacheService::in_memory(config)?
    } else {
        DashboardCacheService::connect(config).await?
    };

    match cli.command {
        Commands::Serve { health_interval } => {
            run_serve(service, health_interval).await?;
        }
        Commands::Get { key, data_type, raw } => {
            run_get(service, key, data_type, raw).await?;
        }
        Commands::Health => {
            let report = service.health_check().await;
            print_health(&report);
        }
        Commands::Metrics => {
            run_metrics(service).await?;
        }
        Commands::Warm { critical } => {
            run_warm(service, critical).await;
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

async fn run_serve(service: DashboardCacheService, health_interval: u64) -> anyhow::Result<()> {
    let report = service.start().await;
    println!(
        "{} {} critical keys warmed, {} failed",
        "Started:".green().bold(),
        report.succeeded(),
        report.failed()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(health_interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            _ = ticker.tick() => {
                let report = service.health_check().await;
                print_health(&report);
            }
        }
    }

    service.shutdown().await;
    println!("{}", "Stopped.".green());
    Ok(())
}

async fn run_get(
    service: DashboardCacheService,
    key: String,
    data_type: DataType,
    raw: bool,
) -> anyhow::Result<()> {
    if raw {
        let (value, status) = service
            .client()
            .get_with_default_timeout(&key, json!(null))
            .await;
        let label = match status {
            CacheStatus::Hit => status.as_str().green(),
            CacheStatus::Miss | CacheStatus::Warming => status.as_str().yellow(),
            CacheStatus::Error | CacheStatus::Timeout => status.as_str().red(),
        };
        println!("{} {}", "Status:".bold(), label);
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let value = service.get_with_fallback(&key, json!({}), data_type).await;
    if dashboard_cache::caching::payloads::is_placeholder_value(&value) {
        warn!("{} is being served from placeholder data", key);
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run_metrics(service: DashboardCacheService) -> anyhow::Result<()> {
    let snapshot = service.get_cache_metrics().await;
    let global = &snapshot.global_metrics;

    println!("{}", "Cache Metrics:".bold());
    println!("  Requests: {}", global.total_requests());
    println!("  Hit ratio: {:.1}%", global.hit_ratio());
    println!("  Failure ratio: {:.1}%", global.failure_ratio());
    println!("  Avg response time: {:.2} ms", global.avg_response_time_ms);
    println!(
        "  Circuit breaker: {} ({} failures)",
        if global.circuit_breaker_open {
            "open".red()
        } else {
            "closed".green()
        },
        global.circuit_breaker_failures
    );

    let mut keys: Vec<_> = snapshot.key_metrics.iter().collect();
    keys.sort_by(|a, b| a.0.cmp(b.0));
    for (key, metrics) in keys {
        println!(
            "  {:<24} hits {:>5}  misses {:>5}  errors {:>5}  timeouts {:>5}  {:.2} ms",
            key, metrics.hits, metrics.misses, metrics.errors, metrics.timeouts, metrics.avg_response_time_ms
        );
    }

    println!("{}", "Warming Tasks:".bold());
    for task in service.warming_status().await {
        let state = if task.paused {
            "paused".red()
        } else if task.due {
            "due".yellow()
        } else {
            "fresh".green()
        };
        println!(
            "  {:<24} p{}  {:<6}  failures {}",
            task.key, task.priority, state, task.consecutive_failures
        );
    }

    Ok(())
}

async fn run_warm(service: DashboardCacheService, critical: bool) {
    let report = if critical {
        service.warmer().warm_critical_data().await
    } else {
        service.run_warming_cycle().await
    };

    if report.skipped {
        println!("{}", "Skipped: circuit breaker is open".red());
        return;
    }
    for (key, outcome) in &report.outcomes {
        let label = format!("{:?}", outcome);
        let label = if outcome.is_success() {
            label.green()
        } else {
            label.red()
        };
        println!("  {:<24} {}", key, label);
    }
    println!("Warmed {}, failed {}", report.succeeded(), report.failed());
}

fn print_health(report: &HealthReport) {
    let status = match report.status {
        HealthStatus::Healthy => report.status.as_str().green().bold(),
        HealthStatus::Degraded => report.status.as_str().yellow().bold(),
        HealthStatus::Unhealthy | HealthStatus::Error => report.status.as_str().red().bold(),
    };
    println!("{} {} ({})", "Health:".bold(), status, report.timestamp.to_rfc3339());

    if let Some(checks) = &report.checks {
        println!(
            "  Connectivity: {} in {:.1} ms",
            checks.connectivity.status, checks.connectivity.round_trip_ms
        );
        for (key, check) in &checks.critical_keys {
            println!("  {:<24} {} (data: {})", key, check.status, check.has_data);
        }
        println!("  Circuit breaker: {:?}", checks.circuit_breaker.state);
    }
    if let Some(error) = &report.error {
        println!("  {}", error.red());
    }
}

fn run_init(output: &str) -> anyhow::Result<()> {
    let config = ServiceConfig::default();
    config.save_to_file(output)?;

    println!("Created configuration file: {}", output);
    println!("Edit the Redis URL, source base URL and warming table to match your deployment.");

    Ok(())
}
