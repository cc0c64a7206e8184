//! Probe targets.
//!
//! A target is identified purely by its address string. Discovery
//! produces a fresh list every cycle; two targets are the same target
//! when their addresses are equal.

use std::collections::HashSet;
use std::fmt;
use std::net::{AddrParseError, IpAddr};

use serde::{Deserialize, Serialize};

/// A network endpoint address subject to latency probing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Target(String);

impl Target {
    /// Create a target from an address literal (surrounding whitespace is dropped).
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self(address.trim().to_string())
    }

    /// The address string, also used as the metric label value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the address as an IP literal.
    pub fn ip(&self) -> Result<IpAddr, AddrParseError> {
        self.0.parse()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Target {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Target {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

/// Whether an endpoint record is a probe target.
///
/// Host-network endpoints share the node's address and are not reachable
/// on the probed network plane, so they are excluded.
pub fn is_probe_target(host_address: &str, endpoint_address: &str) -> bool {
    !endpoint_address.is_empty() && endpoint_address != host_address
}

/// Remove duplicate addresses, keeping the first occurrence order.
pub fn dedup_targets(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets
        .into_iter()
        .filter(|t| !t.as_str().is_empty() && seen.insert(t.clone()))
        .collect()
}
