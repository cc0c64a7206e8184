//! Command-line flags.

use std::path::PathBuf;

use clap::Parser;

use super::AppConfig;

/// Ping latency exporter for Kubernetes pods.
#[derive(Debug, Clone, Default, Parser)]
#[command(version, about)]
pub struct CliArgs {
  /// Optional TOML configuration file.
  #[arg(long, value_name = "PATH")]
  pub config: Option<PathBuf>,

  /// Absolute path to the kubeconfig file (default: $HOME/.kube/config).
  #[arg(long, value_name = "PATH")]
  pub kubeconfig: Option<PathBuf>,

  /// Log level override (trace, debug, info, warn, error).
  #[arg(long, value_name = "LEVEL")]
  pub log_level: Option<String>,
}

impl CliArgs {
  /// Apply flag values on top of the file configuration.
  pub fn apply(&self, config: &mut AppConfig) {
    if let Some(path) = &self.kubeconfig {
      config.discovery.kubeconfig = Some(path.clone());
    }
    if let Some(level) = &self.log_level {
      config.exporter.log_level.clone_from(level);
    }
  }
}
