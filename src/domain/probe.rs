//! Probe results and round-trip aggregation.
//!
//! A probe run sends a fixed number of echo requests and reports the
//! arithmetic mean RTT of the replies that arrived. A run with no replies
//! reports [`UNREACHABLE_RTT_MS`] so scrapers see an explicit value
//! instead of the previous (stale) measurement.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::target::Target;

/// Latency reported for a target that answered none of the echo requests.
pub const UNREACHABLE_RTT_MS: f64 = -1.0;

/// Outcome of one fixed-count probe run against a single target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Probed address.
    pub target: Target,
    /// Mean RTT of received replies in milliseconds, or the sentinel.
    pub average_rtt_ms: f64,
    /// Echo requests the run was asked to send.
    pub sample_count: u32,
    /// Replies received within the run.
    pub received: u32,
    /// Fraction of requests that went unanswered (0.0..=1.0).
    pub packet_loss: f64,
    /// Launch sequence number assigned by the scheduler.
    pub sequence: u64,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
}

impl ProbeResult {
    /// Aggregate the RTT samples of a finished run.
    ///
    /// Samples beyond `sample_count` are ignored.
    pub fn from_samples(
        target: Target,
        sample_count: u32,
        rtts: &[Duration],
        sequence: u64,
    ) -> Self {
        let usable = &rtts[..rtts.len().min(sample_count as usize)];
        let received = u32::try_from(usable.len()).unwrap_or(sample_count);

        Self {
            target,
            average_rtt_ms: mean_rtt_ms(usable).unwrap_or(UNREACHABLE_RTT_MS),
            sample_count,
            received,
            packet_loss: loss_ratio(sample_count, received),
            sequence,
            completed_at: Utc::now(),
        }
    }

    /// Whether at least one reply arrived.
    pub fn is_reachable(&self) -> bool {
        self.received > 0
    }
}

/// Arithmetic mean of the samples in milliseconds, `None` when empty.
pub fn mean_rtt_ms(rtts: &[Duration]) -> Option<f64> {
    if rtts.is_empty() {
        return None;
    }
    let total_nanos: u128 = rtts.iter().map(Duration::as_nanos).sum();
    Some(total_nanos as f64 / (rtts.len() as f64 * 1_000_000.0))
}

/// Fraction of unanswered requests. Nothing sent counts as total loss.
pub fn loss_ratio(sent: u32, received: u32) -> f64 {
    if sent == 0 {
        return 1.0;
    }
    let lost = sent.saturating_sub(received);
    f64::from(lost) / f64::from(sent)
}
