//! Use Cases Layer - Application Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! exporter's long-running workflows.
//!
//! Use cases:
//! - `ProbeScheduler`: discovery, paced probe fan-out, result recording
//! - `HealthMonitor`: periodic self-check of the metrics endpoint

pub mod health_monitor;
pub mod scheduler;
