//! Latency Store Port - Latest Latency per Target
//!
//! The only structure shared between probe tasks. Writes come from many
//! concurrent probe completions; reads are whole-set snapshots for
//! exposition. The backing map is never exposed for direct mutation.

use std::collections::BTreeMap;

use crate::domain::probe::ProbeResult;
use crate::domain::target::Target;

/// What happened to a recorded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
  /// The result replaced the stored value.
  Recorded,
  /// Dropped: a later launch was already stored, or the target has since
  /// left discovery.
  Stale,
}

/// Thread-safe store of the latest latency per target label.
pub trait LatencyStore: Send + Sync + 'static {
  /// Store a completed probe result under its target's address label.
  fn record(&self, result: &ProbeResult) -> RecordOutcome;

  /// Consistent copy of every label and its latest latency (ms).
  fn snapshot(&self) -> BTreeMap<String, f64>;

  /// Mark the targets of a successful discovery cycle as seen and evict
  /// labels that have been absent for too many cycles.
  ///
  /// Returns the evicted labels.
  fn retain_targets(&self, targets: &[Target]) -> Vec<String>;

  /// A probe for `target` could not be started.
  fn observe_skip(&self, _target: &Target) {}

  /// A discovery cycle finished; `None` when it failed.
  fn observe_discovery(&self, _discovered: Option<usize>) {}
}
