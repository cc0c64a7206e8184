//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `TargetProvider`: Enumerates the addresses to probe
//! - `Prober`: Runs one latency measurement against one address
//! - `LatencyStore`: Holds the latest latency per target label
//! - `HealthCheck`: One self-check of the exporter

pub mod health_check;
pub mod latency_store;
pub mod prober;
pub mod target_provider;
