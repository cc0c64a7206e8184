//! Pod Latency Exporter - Entry Point
//!
//! Initializes configuration, logging, the metrics and health servers,
//! and the probe scheduler. Runs until SIGINT/SIGTERM.
//!
//! Wiring sequence:
//! 1. Parse flags, load the optional TOML file, apply overrides, validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create the latency registry and spawn the `/metrics` server
//! 4. Spawn the health monitor and the `/healthz` server
//! 5. Build the target provider and the ICMP prober
//! 6. Spawn the probe scheduler
//! 7. Wait for SIGINT/SIGTERM, then shut everything down in order

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use pod_latency_exporter::adapters::discovery::build_provider;
use pod_latency_exporter::adapters::metrics::{
    HealthServer, HttpEndpointCheck, LatencyRegistry, MetricsServer,
};
use pod_latency_exporter::adapters::probe::IcmpProber;
use pod_latency_exporter::config::cli::CliArgs;
use pod_latency_exporter::config::loader::{load_config, validate_config};
use pod_latency_exporter::usecases::health_monitor::HealthMonitor;
use pod_latency_exporter::usecases::scheduler::{ProbeScheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Configuration: file, then flags ──────────────────
    let args = CliArgs::parse();
    let mut config =
        load_config(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    validate_config(&config).context("Invalid configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.exporter.log_level)),
        )
        .json()
        .init();

    info!(
        version = %config.exporter.version,
        config_file = ?args.config,
        source = ?config.discovery.source,
        sample_count = config.probe.sample_count,
        pacing_ms = config.probe.pacing_interval_ms,
        "Starting pod latency exporter"
    );

    // ── 3. Shutdown signal channel ──────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 4. Latency registry + /metrics server ───────────────
    let registry = Arc::new(
        LatencyRegistry::new(
            config.probe.reject_stale_results,
            config.discovery.evict_after_cycles,
        )
        .context("Failed to register metrics")?,
    );
    let metrics_listener = TcpListener::bind(&config.metrics.bind_address)
        .await
        .with_context(|| format!("Failed to bind metrics on {}", config.metrics.bind_address))?;
    let metrics_server = MetricsServer::new(Arc::clone(&registry), config.metrics.path.clone());
    let metrics_handle = spawn_logged(
        "metrics server",
        metrics_server.serve(metrics_listener, shutdown_tx.subscribe()),
    );

    // ── 5. Self-check monitor + /healthz server ─────────────
    let check_url = config
        .health_check_url()
        .context("Failed to derive the metrics self-check URL")?;
    let check = HttpEndpointCheck::new(
        check_url,
        Duration::from_millis(config.health.check_timeout_ms),
    )
    .context("Failed to build metrics self-check")?;
    let (monitor, health_rx) = HealthMonitor::new(
        Arc::new(check),
        Duration::from_secs(config.health.check_interval_secs),
    );
    let health_listener = TcpListener::bind(&config.health.bind_address)
        .await
        .with_context(|| format!("Failed to bind health on {}", config.health.bind_address))?;
    let health_server = HealthServer::new(health_rx, config.exporter.version.clone());
    let health_handle = spawn_logged(
        "health server",
        health_server.serve(health_listener, shutdown_tx.subscribe()),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    // ── 6. Target provider + prober ─────────────────────────
    let provider = build_provider(&config.discovery).context("Failed to set up target discovery")?;
    let prober = Arc::new(IcmpProber::new((&config.probe).into()));

    // ── 7. Probe scheduler ──────────────────────────────────
    let scheduler = ProbeScheduler::new(
        provider,
        prober,
        Arc::clone(&registry) as _,
        SchedulerConfig::from(&config),
    );
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_tx.subscribe()));

    info!("All tasks spawned, exporter is running");

    // ── 8. Wait for SIGINT or SIGTERM ───────────────────────
    wait_for_signal().await;

    // ── Graceful shutdown ───────────────────────────────────
    let _ = shutdown_tx.send(());
    info!("Shutdown signal broadcast to all tasks");

    // Scheduler first: it drains in-flight probes within its own grace
    // period, so allow a little on top before giving up.
    let grace = Duration::from_millis(config.probe.shutdown_grace_ms) + Duration::from_secs(2);
    if tokio::time::timeout(grace, scheduler_handle).await.is_err() {
        warn!("Probe scheduler did not stop in time");
    }

    for (name, handle) in [
        ("health monitor", monitor_handle),
        ("health server", health_handle),
        ("metrics server", metrics_handle),
    ] {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!(task = name, "Task did not stop in time");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Spawn a fallible task and log its error instead of dropping it.
fn spawn_logged<F>(name: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "Task failed");
        }
    })
}

/// Resolve on the first SIGINT, or SIGTERM on unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("SIGINT received, initiating graceful shutdown"),
                    _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler, SIGINT only"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT");
    }
    info!("SIGINT received, initiating graceful shutdown");
}
