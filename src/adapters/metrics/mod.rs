//! Metrics and Monitoring Adapters
//!
//! Provides the Prometheus latency registry with its `/metrics` server
//! and the `/healthz` liveness endpoint, both via axum 0.7.

pub mod health;
pub mod prometheus;

pub use self::health::{HealthServer, HttpEndpointCheck};
pub use self::prometheus::{LatencyRegistry, MetricsServer};
