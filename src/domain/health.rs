//! Exporter self-health record.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of the most recent self-check.
///
/// A state that has never run counts as unhealthy: the exporter has not
/// yet proven that its exposition endpoint answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthState {
    /// Name of the check, reported on the health endpoint.
    pub check_name: String,
    /// When the check last completed.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Error of the last run, `None` when it succeeded.
    pub last_error: Option<String>,
}

impl HealthState {
    /// A check that has not run yet.
    pub fn pending(check_name: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            last_run_at: None,
            last_error: None,
        }
    }

    /// Record a successful run.
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_run_at = Some(at);
        self.last_error = None;
    }

    /// Record a failed run.
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.last_run_at = Some(at);
        self.last_error = Some(error.into());
    }

    /// Whether the most recent run succeeded.
    pub fn is_healthy(&self) -> bool {
        self.last_run_at.is_some() && self.last_error.is_none()
    }
}
