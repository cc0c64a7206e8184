//! Prober Port - Single Target Latency Measurement
//!
//! A probe sends a fixed number of echo requests to one target and
//! aggregates the replies into a [`ProbeResult`]. Packet loss is not an
//! error: it shows up in the result (down to the unreachable sentinel).

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::probe::ProbeResult;
use crate::domain::target::Target;

/// A probe that could not be started or completed.
///
/// The scheduler skips the affected target and keeps probing the rest.
#[derive(Debug, Error)]
pub enum ProbeError {
  /// The target is not a valid address literal.
  #[error("invalid target address {target:?}: {reason}")]
  InvalidAddress {
    /// Offending address string.
    target: String,
    /// Parser message.
    reason: String,
  },
  /// The probe socket could not be opened (usually missing CAP_NET_RAW).
  #[error("probe socket unavailable: {0}")]
  Socket(String),
  /// The probe task died before producing a result.
  #[error("probe task failed: {0}")]
  Task(String),
}

/// Trait for latency probers.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
  /// Probe `target` with `sample_count` echo requests.
  ///
  /// `sequence` is the launch sequence number, carried into the result
  /// so the store can reject results older than the one it holds.
  async fn probe(
    &self,
    target: &Target,
    sample_count: u32,
    sequence: u64,
  ) -> Result<ProbeResult, ProbeError>;
}
