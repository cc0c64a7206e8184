//! Health Monitor - Periodic Exporter Self-Check
//!
//! Runs the configured self-check on a fixed interval, starting
//! immediately, and publishes the latest outcome over a
//! `tokio::sync::watch` channel. The health endpoint reads the most
//! recent value without ever waiting on a check in progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::domain::health::HealthState;
use crate::ports::health_check::HealthCheck;

/// Periodically runs a [`HealthCheck`] and publishes its state.
pub struct HealthMonitor {
    check: Arc<dyn HealthCheck>,
    interval: Duration,
    state_tx: watch::Sender<HealthState>,
}

impl HealthMonitor {
    /// Create a monitor for `check`.
    ///
    /// Returns the monitor and a receiver holding the latest state,
    /// initially pending (unhealthy).
    pub fn new(
        check: Arc<dyn HealthCheck>,
        interval: Duration,
    ) -> (Self, watch::Receiver<HealthState>) {
        let (state_tx, state_rx) = watch::channel(HealthState::pending(check.name()));
        let monitor = Self {
            check,
            interval,
            state_tx,
        };
        (monitor, state_rx)
    }

    /// Run checks until shutdown. The first check runs immediately.
    #[instrument(skip_all, fields(check = self.check.name()))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Health monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Health monitor shutting down");
                    return;
                }
                _ = ticker.tick() => self.run_check().await,
            }
        }
    }

    /// Run the check once and publish the outcome.
    pub async fn run_check(&self) {
        let outcome = self.check.check().await;
        let now = Utc::now();
        let was_healthy = self.state_tx.borrow().is_healthy();

        self.state_tx.send_modify(|state| match &outcome {
            Ok(()) => state.record_success(now),
            Err(e) => state.record_failure(now, e.clone()),
        });

        match (&outcome, was_healthy) {
            (Ok(()), false) => info!("Self-check passing"),
            (Err(e), true) => warn!(error = %e, "Self-check failing"),
            (Err(e), false) => debug!(error = %e, "Self-check still failing"),
            (Ok(()), true) => debug!("Self-check passed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct ToggleCheck {
        passing: AtomicBool,
        runs: AtomicUsize,
    }

    impl ToggleCheck {
        fn new(passing: bool) -> Arc<Self> {
            Arc::new(Self {
                passing: AtomicBool::new(passing),
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl HealthCheck for ToggleCheck {
        fn name(&self) -> &str {
            "Check_Metrics_Export"
        }

        async fn check(&self) -> Result<(), String> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.passing.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("Service Unavailable".to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_pending() {
        let (_monitor, state_rx) = HealthMonitor::new(ToggleCheck::new(true), Duration::from_secs(10));
        let state = state_rx.borrow();
        assert_eq!(state.check_name, "Check_Metrics_Export");
        assert!(state.last_run_at.is_none());
        assert!(!state.is_healthy());
    }

    #[tokio::test]
    async fn test_run_check_records_outcome() {
        let check = ToggleCheck::new(false);
        let (monitor, state_rx) =
            HealthMonitor::new(Arc::clone(&check) as Arc<dyn HealthCheck>, Duration::from_secs(10));

        monitor.run_check().await;
        assert!(!state_rx.borrow().is_healthy());
        assert_eq!(
            state_rx.borrow().last_error.as_deref(),
            Some("Service Unavailable")
        );

        check.passing.store(true, Ordering::SeqCst);
        monitor.run_check().await;
        assert!(state_rx.borrow().is_healthy());
        assert!(state_rx.borrow().last_run_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checks_run_immediately_then_on_interval() {
        let check = ToggleCheck::new(true);
        let (monitor, state_rx) =
            HealthMonitor::new(Arc::clone(&check) as Arc<dyn HealthCheck>, Duration::from_secs(10));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(monitor.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(check.runs.load(Ordering::SeqCst), 1);
        assert!(state_rx.borrow().is_healthy());

        // ticks at 10s and 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(check.runs.load(Ordering::SeqCst), 3);

        check.passing.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!state_rx.borrow().is_healthy());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
