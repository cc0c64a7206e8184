//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (Kubernetes API over HTTP, raw ICMP sockets,
//! Prometheus exposition). Each sub-module groups adapters by
//! infrastructure concern.
//!
//! Adapter categories:
//! - `discovery`: Kubernetes pod list and static target providers
//! - `probe`: ICMP echo prober
//! - `metrics`: Prometheus latency registry, `/metrics` and `/healthz`

pub mod discovery;
pub mod metrics;
pub mod probe;
