//! Probe Adapters
//!
//! Implementations of the `Prober` port. Only ICMP echo round-trip
//! probing is provided.

pub mod icmp;

pub use icmp::{IcmpProber, IcmpProberConfig};
