//! Configuration Module - TOML-based Exporter Configuration
//!
//! Loads and validates configuration from an optional TOML file with
//! command-line overrides. Every field has a default, so the exporter
//! runs with no file at all: 5 echo requests per probe, 750ms pacing,
//! metrics on :9101 and health on :8000.

pub mod cli;
pub mod loader;

use std::net::{AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level exporter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Process identity and logging.
  pub exporter: ExporterConfig,
  /// Target discovery.
  pub discovery: DiscoveryConfig,
  /// Probe pacing and sampling.
  pub probe: ProbeConfig,
  /// Prometheus exposition endpoint.
  pub metrics: MetricsConfig,
  /// Self-health endpoint.
  pub health: HealthConfig,
}

/// Exporter identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
  /// Log level (trace, debug, info, warn, error).
  pub log_level: String,
  /// Version string reported on the health endpoint.
  pub version: String,
}

/// Where targets come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
  /// In-cluster service account when running in a pod, kubeconfig otherwise.
  Auto,
  /// Service account token mounted into the pod.
  InCluster,
  /// A kubeconfig file.
  Kubeconfig,
  /// The fixed `static_targets` list.
  Static,
}

/// Target discovery configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
  /// Discovery source.
  pub source: DiscoverySource,
  /// Kubeconfig path (default `$HOME/.kube/config`).
  pub kubeconfig: Option<PathBuf>,
  /// Restrict discovery to one namespace (all namespaces when unset).
  pub namespace: Option<String>,
  /// Targets for the `static` source.
  pub static_targets: Vec<String>,
  /// Pod list request timeout (milliseconds).
  pub request_timeout_ms: u64,
  /// First retry delay after a failed discovery (milliseconds).
  pub initial_backoff_ms: u64,
  /// Retry delay cap (milliseconds).
  pub max_backoff_ms: u64,
  /// Evict labels absent from this many consecutive discoveries (0 = never).
  pub evict_after_cycles: u64,
}

/// Probe configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
  /// Echo requests per probe run.
  pub sample_count: u32,
  /// Delay between launching probes of consecutive targets (milliseconds).
  pub pacing_interval_ms: u64,
  /// Delay between echo requests within one run (milliseconds).
  pub sample_interval_ms: u64,
  /// Wait for outstanding replies after the last request (milliseconds).
  pub reply_timeout_ms: u64,
  /// Drop results older (by launch) than the stored one.
  pub reject_stale_results: bool,
  /// Wait for in-flight probes on shutdown (milliseconds).
  pub shutdown_grace_ms: u64,
}

/// Prometheus exposition configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
  /// Metrics server bind address.
  pub bind_address: String,
  /// HTTP path serving the text exposition.
  pub path: String,
}

/// Self-health configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
  /// Health server bind address.
  pub bind_address: String,
  /// Self-check period (seconds).
  pub check_interval_secs: u64,
  /// URL fetched by the self-check. Derived from `[metrics]` when unset.
  pub check_url: Option<String>,
  /// Self-check request timeout (milliseconds).
  pub check_timeout_ms: u64,
}

impl Default for ExporterConfig {
  fn default() -> Self {
    Self {
      log_level: "info".to_string(),
      version: env!("CARGO_PKG_VERSION").to_string(),
    }
  }
}

impl Default for DiscoveryConfig {
  fn default() -> Self {
    Self {
      source: DiscoverySource::Auto,
      kubeconfig: None,
      namespace: None,
      static_targets: Vec::new(),
      request_timeout_ms: 10_000,
      initial_backoff_ms: 1_000,
      max_backoff_ms: 60_000,
      evict_after_cycles: 3,
    }
  }
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      sample_count: 5,
      pacing_interval_ms: 750,
      sample_interval_ms: 1_000,
      reply_timeout_ms: 1_000,
      reject_stale_results: true,
      shutdown_grace_ms: 10_000,
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      bind_address: "0.0.0.0:9101".to_string(),
      path: "/metrics".to_string(),
    }
  }
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      bind_address: "0.0.0.0:8000".to_string(),
      check_interval_secs: 10,
      check_url: None,
      check_timeout_ms: 2_000,
    }
  }
}

impl AppConfig {
  /// URL the self-check fetches: `health.check_url` if set, else the
  /// configured metrics endpoint. A wildcard bind is reached over loopback.
  ///
  /// # Errors
  /// Fails when `metrics.bind_address` is not a socket address.
  pub fn health_check_url(&self) -> Result<String, AddrParseError> {
    if let Some(url) = &self.health.check_url {
      return Ok(url.clone());
    }
    let mut addr: SocketAddr = self.metrics.bind_address.parse()?;
    if addr.ip().is_unspecified() {
      let loopback = match addr.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
      };
      addr.set_ip(loopback);
    }
    Ok(format!("http://{addr}{}", self.metrics.path))
  }
}

impl DiscoveryConfig {
  /// Kubeconfig to use: the configured path, else `$HOME/.kube/config`.
  pub fn kubeconfig_path(&self) -> Option<PathBuf> {
    self
      .kubeconfig
      .clone()
      .or_else(|| dirs::home_dir().map(|home| home.join(".kube").join("config")))
  }
}

impl ProbeConfig {
  /// Pacing between probe launches.
  pub fn pacing_interval(&self) -> Duration {
    Duration::from_millis(self.pacing_interval_ms)
  }

  /// Spacing between echo requests of one run.
  pub fn sample_interval(&self) -> Duration {
    Duration::from_millis(self.sample_interval_ms)
  }

  /// Reply wait after the last echo request.
  pub fn reply_timeout(&self) -> Duration {
    Duration::from_millis(self.reply_timeout_ms)
  }
}
