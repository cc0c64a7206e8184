//! Domain layer - Core exporter models and pure logic.
//!
//! Targets, probe results, RTT aggregation, retry backoff and the
//! self-health record. No I/O here (hexagonal architecture inner ring),
//! so everything is testable in isolation.

pub mod backoff;
pub mod health;
pub mod probe;
pub mod target;

// Re-export core types for convenience
pub use backoff::ExponentialBackoff;
pub use health::HealthState;
pub use probe::{ProbeResult, UNREACHABLE_RTT_MS};
pub use target::Target;
