//! Prometheus Latency Registry - Exposition of Probe Results
//!
//! Holds the latest RTT per target in a Prometheus `GaugeVec` labelled
//! by address and serves it as the text exposition format. A private
//! label map guarded by the same mutex tracks launch sequence numbers
//! and discovery cycles, so stale-write rejection and eviction stay
//! consistent with what `/metrics` renders.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::domain::probe::ProbeResult;
use crate::domain::target::Target;
use crate::ports::latency_store::{LatencyStore, RecordOutcome};

/// Average RTT gauge, one series per target address.
pub const LATENCY_METRIC: &str = "ping_average_latency_k8s_pods_millisec";
/// Packet loss gauge, one series per target address.
pub const PACKET_LOSS_METRIC: &str = "ping_packet_loss_ratio";
/// Probe outcome counter.
pub const PROBES_METRIC: &str = "ping_probes_total";
/// Failed discovery counter.
pub const DISCOVERY_FAILURES_METRIC: &str = "ping_discovery_failures_total";
/// Size of the last successful discovery.
pub const DISCOVERED_TARGETS_METRIC: &str = "ping_discovered_targets";

/// Per-label bookkeeping behind the gauges.
#[derive(Debug, Clone, Copy)]
struct Entry {
    latency_ms: f64,
    sequence: u64,
}

#[derive(Debug, Default)]
struct Labels {
    entries: HashMap<String, Entry>,
    /// Discovery cycle each label was last listed in. Outlives the entry
    /// itself so a probe finishing after eviction cannot bring it back.
    discovered: HashMap<String, u64>,
    cycle: u64,
}

impl Labels {
    /// Whether `label` was listed in one of the last `window` discoveries.
    fn in_window(&self, label: &str, window: u64) -> bool {
        if window == 0 {
            return true;
        }
        self.discovered
            .get(label)
            .is_some_and(|seen| self.cycle.saturating_sub(*seen) < window)
    }
}

/// Latest latency per target, exported for Prometheus.
///
/// All per-target writes and evictions happen under one mutex, and
/// rendering gathers under the same mutex, so a scrape never sees a
/// latency without its matching loss value or a half-evicted label.
pub struct LatencyRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Average RTT per target (milliseconds, -1 when unreachable).
    latency_ms: GaugeVec,
    /// Packet loss per target (0..=1).
    packet_loss: GaugeVec,
    /// Probe outcomes (ok, unreachable, skipped, stale).
    probes_total: IntCounterVec,
    /// Failed discovery cycles.
    discovery_failures: IntCounter,
    /// Targets returned by the last successful discovery.
    discovered_targets: IntGauge,
    /// Label bookkeeping.
    labels: Mutex<Labels>,
    /// Drop results launched before the stored one.
    reject_stale: bool,
    /// Evict labels unseen for this many discovery cycles (0 = never).
    evict_after_cycles: u64,
}

impl LatencyRegistry {
    /// Create and register all exporter metrics.
    pub fn new(reject_stale: bool, evict_after_cycles: u64) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let latency_ms = GaugeVec::new(
            Opts::new(LATENCY_METRIC, "latency of targets"),
            &["target"],
        )?;

        let packet_loss = GaugeVec::new(
            Opts::new(
                PACKET_LOSS_METRIC,
                "Fraction of echo requests without reply in the last probe",
            ),
            &["target"],
        )?;

        let probes_total = IntCounterVec::new(
            Opts::new(PROBES_METRIC, "Probe runs by outcome"),
            &["outcome"],
        )?;

        let discovery_failures = IntCounter::new(
            DISCOVERY_FAILURES_METRIC,
            "Target discovery cycles that failed",
        )?;

        let discovered_targets = IntGauge::new(
            DISCOVERED_TARGETS_METRIC,
            "Targets returned by the last successful discovery",
        )?;

        // Register all metrics
        registry.register(Box::new(latency_ms.clone()))?;
        registry.register(Box::new(packet_loss.clone()))?;
        registry.register(Box::new(probes_total.clone()))?;
        registry.register(Box::new(discovery_failures.clone()))?;
        registry.register(Box::new(discovered_targets.clone()))?;
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            latency_ms,
            packet_loss,
            probes_total,
            discovery_failures,
            discovered_targets,
            labels: Mutex::new(Labels::default()),
            reject_stale,
            evict_after_cycles,
        })
    }

    fn labels(&self) -> MutexGuard<'_, Labels> {
        self.labels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode every metric family in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let metric_families = {
            let _labels = self.labels();
            self.registry.gather()
        };
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Probe outcome count, mainly for tests and logs.
    pub fn probe_count(&self, outcome: &str) -> u64 {
        self.probes_total.with_label_values(&[outcome]).get()
    }
}

impl LatencyStore for LatencyRegistry {
    fn record(&self, result: &ProbeResult) -> RecordOutcome {
        let label = result.target.as_str();
        let mut labels = self.labels();

        // before the first discovery every result counts as listed now
        if labels.cycle == 0 {
            labels.discovered.entry(label.to_string()).or_insert(0);
        }
        if !labels.in_window(label, self.evict_after_cycles) {
            self.probes_total.with_label_values(&["stale"]).inc();
            return RecordOutcome::Stale;
        }

        if self.reject_stale {
            if let Some(existing) = labels.entries.get(label) {
                if existing.sequence > result.sequence {
                    self.probes_total.with_label_values(&["stale"]).inc();
                    return RecordOutcome::Stale;
                }
            }
        }

        labels.entries.insert(
            label.to_string(),
            Entry {
                latency_ms: result.average_rtt_ms,
                sequence: result.sequence,
            },
        );
        self.latency_ms
            .with_label_values(&[label])
            .set(result.average_rtt_ms);
        self.packet_loss
            .with_label_values(&[label])
            .set(result.packet_loss);

        let outcome = if result.is_reachable() { "ok" } else { "unreachable" };
        self.probes_total.with_label_values(&[outcome]).inc();
        RecordOutcome::Recorded
    }

    fn snapshot(&self) -> BTreeMap<String, f64> {
        self.labels()
            .entries
            .iter()
            .map(|(label, entry)| (label.clone(), entry.latency_ms))
            .collect()
    }

    fn retain_targets(&self, targets: &[Target]) -> Vec<String> {
        let mut labels = self.labels();
        labels.cycle += 1;
        let cycle = labels.cycle;

        if self.evict_after_cycles == 0 {
            return Vec::new();
        }

        for target in targets {
            labels.discovered.insert(target.as_str().to_string(), cycle);
        }

        let window = self.evict_after_cycles;
        let evicted: Vec<String> = labels
            .entries
            .keys()
            .filter(|label| !labels.in_window(label, window))
            .cloned()
            .collect();
        labels
            .discovered
            .retain(|_, seen| cycle.saturating_sub(*seen) < window);

        for label in &evicted {
            labels.entries.remove(label);
            let _ = self.latency_ms.remove_label_values(&[label]);
            let _ = self.packet_loss.remove_label_values(&[label]);
        }
        evicted
    }

    fn observe_skip(&self, _target: &Target) {
        self.probes_total.with_label_values(&["skipped"]).inc();
    }

    fn observe_discovery(&self, discovered: Option<usize>) {
        match discovered {
            Some(count) => self
                .discovered_targets
                .set(i64::try_from(count).unwrap_or(i64::MAX)),
            None => self.discovery_failures.inc(),
        }
    }
}

/// Axum server exposing a [`LatencyRegistry`] to scrapers.
pub struct MetricsServer {
    registry: Arc<LatencyRegistry>,
    path: String,
}

impl MetricsServer {
    /// Create a metrics server serving `registry` at `path`.
    pub fn new(registry: Arc<LatencyRegistry>, path: impl Into<String>) -> Self {
        Self {
            registry,
            path: path.into(),
        }
    }

    /// Router with the exposition route, usable without a listener.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.path, get(Self::exposition))
            .with_state(Arc::clone(&self.registry))
    }

    /// Serve Prometheus metrics until shutdown.
    #[instrument(skip(self, listener, shutdown_rx))]
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let app = self.router();

        info!(
            address = %listener.local_addr()?,
            path = %self.path,
            "Prometheus metrics server started"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Render the registry; never mutates it.
    async fn exposition(State(registry): State<Arc<LatencyRegistry>>) -> impl IntoResponse {
        match registry.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
                body,
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
            }
        }
    }
}
