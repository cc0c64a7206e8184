//! Target Provider Port - Probe Target Enumeration
//!
//! Defines the trait for sources that return the current ordered set of
//! addresses to probe (Kubernetes pod list, static configuration).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::target::Target;

/// Failure to obtain the target list.
///
/// Never fatal for the exporter: the scheduler keeps the previous list
/// and retries on the next cycle.
#[derive(Debug, Error)]
pub enum DiscoveryError {
  /// Credentials could not be read or are incomplete.
  #[error("discovery credentials unavailable: {0}")]
  Credentials(String),
  /// The inventory source could not be reached.
  #[error("discovery request failed: {0}")]
  Request(String),
  /// The inventory source answered with a non-success status.
  #[error("discovery request returned {status}: {body}")]
  Status {
    /// HTTP status code.
    status: u16,
    /// Response body (truncated by the adapter).
    body: String,
  },
  /// The response could not be decoded.
  #[error("discovery response could not be decoded: {0}")]
  Decode(String),
}

/// Trait for target inventory sources.
///
/// Implementors must exclude addresses that are not reachable on the
/// probed network plane (e.g. endpoints sharing the host's address).
#[async_trait]
pub trait TargetProvider: Send + Sync + 'static {
  /// Return the current ordered list of targets.
  async fn discover(&self) -> Result<Vec<Target>, DiscoveryError>;

  /// Short provider name for logs.
  fn name(&self) -> &'static str;
}
