//! Configuration Loader - File Loading and Validation
//!
//! Handles loading the optional TOML file, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use super::{AppConfig, DiscoverySource};

/// Load configuration from a TOML file, or defaults when `path` is `None`.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
  let config = match path {
    Some(path) => {
      let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
      toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?
    }
    None => AppConfig::default(),
  };

  validate_config(&config)?;

  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Positive probe counts and intervals
/// - Parseable bind addresses
/// - A usable target source
pub fn validate_config(config: &AppConfig) -> Result<()> {
  // Probe validation
  anyhow::ensure!(
    config.probe.sample_count > 0 && config.probe.sample_count <= u32::from(u16::MAX),
    "probe.sample_count must be in [1, {}], got {}",
    u16::MAX,
    config.probe.sample_count
  );
  anyhow::ensure!(
    config.probe.pacing_interval_ms > 0,
    "probe.pacing_interval_ms must be positive"
  );
  anyhow::ensure!(
    config.probe.sample_interval_ms > 0,
    "probe.sample_interval_ms must be positive"
  );
  anyhow::ensure!(
    config.probe.reply_timeout_ms > 0,
    "probe.reply_timeout_ms must be positive"
  );

  // Discovery validation
  anyhow::ensure!(
    config.discovery.initial_backoff_ms > 0,
    "discovery.initial_backoff_ms must be positive"
  );
  anyhow::ensure!(
    config.discovery.max_backoff_ms >= config.discovery.initial_backoff_ms,
    "discovery.max_backoff_ms ({}) must be >= initial_backoff_ms ({})",
    config.discovery.max_backoff_ms,
    config.discovery.initial_backoff_ms
  );
  if config.discovery.source == DiscoverySource::Static {
    anyhow::ensure!(
      !config.discovery.static_targets.is_empty(),
      "discovery.static_targets must not be empty when source = \"static\""
    );
  }

  // Endpoint validation
  config
    .metrics
    .bind_address
    .parse::<SocketAddr>()
    .with_context(|| format!("Invalid metrics.bind_address: {}", config.metrics.bind_address))?;
  config
    .health
    .bind_address
    .parse::<SocketAddr>()
    .with_context(|| format!("Invalid health.bind_address: {}", config.health.bind_address))?;
  anyhow::ensure!(
    config.metrics.path.starts_with('/'),
    "metrics.path must start with '/', got {}",
    config.metrics.path
  );
  anyhow::ensure!(
    config.metrics.bind_address != config.health.bind_address,
    "metrics and health endpoints must listen on different addresses"
  );
  anyhow::ensure!(
    config.health.check_interval_secs > 0,
    "health.check_interval_secs must be positive"
  );
  if let Some(url) = &config.health.check_url {
    anyhow::ensure!(!url.is_empty(), "health.check_url must not be empty");
  }

  Ok(())
}
