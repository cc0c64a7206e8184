//! Health Check Port - Exporter Self-Check
//!
//! A self-check verifies the exporter itself (not the probed targets),
//! e.g. that its exposition endpoint answers.

use async_trait::async_trait;

/// Trait for periodic self-checks.
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
  /// Check name reported on the health endpoint.
  fn name(&self) -> &str;

  /// Run the check once; the error string is surfaced verbatim.
  async fn check(&self) -> Result<(), String>;
}
