//! Probe Scheduler - Discovery, Pacing and Fan-out Loop
//!
//! The exporter's control loop. Every sweep starts with a discovery
//! call, then walks the target list launching one fire-and-forget probe
//! per target, waiting a fixed pacing interval between launches. The
//! pacing bounds instantaneous probe concurrency; a full sweep over `n`
//! targets takes about `n × pacing_interval`, however long each probe
//! itself runs.
//!
//! Failure policy:
//! - discovery failure keeps the previous target list; with no list yet,
//!   discovery is retried with exponential backoff
//! - a probe that cannot start skips only that target
//! - total packet loss is recorded as the unreachable sentinel

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::backoff::ExponentialBackoff;
use crate::domain::target::{Target, dedup_targets};
use crate::ports::latency_store::{LatencyStore, RecordOutcome};
use crate::ports::prober::Prober;
use crate::ports::target_provider::TargetProvider;

/// Scheduler timing and sampling parameters.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Echo requests per probe run.
    pub sample_count: u32,
    /// Wait between consecutive probe launches.
    pub pacing_interval: Duration,
    /// First discovery retry delay when no target list exists.
    pub initial_backoff: Duration,
    /// Discovery retry delay cap.
    pub max_backoff: Duration,
    /// How long shutdown waits for in-flight probes.
    pub shutdown_grace: Duration,
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            sample_count: config.probe.sample_count,
            pacing_interval: config.probe.pacing_interval(),
            initial_backoff: Duration::from_millis(config.discovery.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.discovery.max_backoff_ms),
            shutdown_grace: Duration::from_millis(config.probe.shutdown_grace_ms),
        }
    }
}

/// Control loop feeding probe results into the latency store.
pub struct ProbeScheduler {
    provider: Arc<dyn TargetProvider>,
    prober: Arc<dyn Prober>,
    store: Arc<dyn LatencyStore>,
    config: SchedulerConfig,
    /// Last successfully discovered targets.
    targets: Vec<Target>,
    backoff: ExponentialBackoff,
    /// Launch sequence counter, strictly increasing.
    next_sequence: u64,
    /// Probe tasks not yet joined.
    in_flight: JoinSet<()>,
}

impl ProbeScheduler {
    /// Create a scheduler over the given provider, prober and store.
    pub fn new(
        provider: Arc<dyn TargetProvider>,
        prober: Arc<dyn Prober>,
        store: Arc<dyn LatencyStore>,
        config: SchedulerConfig,
    ) -> Self {
        let backoff = ExponentialBackoff::new(config.initial_backoff, config.max_backoff);
        Self {
            provider,
            prober,
            store,
            config,
            targets: Vec::new(),
            backoff,
            next_sequence: 0,
            in_flight: JoinSet::new(),
        }
    }

    /// Run sweeps until shutdown, then wait for in-flight probes.
    #[instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            sample_count = self.config.sample_count,
            pacing_ms = self.config.pacing_interval.as_millis(),
            "Probe scheduler started"
        );

        'sweeps: loop {
            let retry_in = tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break 'sweeps,
                delay = self.refresh_targets() => delay,
            };

            let idle = retry_in.or_else(|| {
                self.targets
                    .is_empty()
                    .then_some(self.config.pacing_interval)
            });
            if let Some(delay) = idle {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break 'sweeps,
                    () = sleep(delay) => continue 'sweeps,
                }
            }

            let sweep = self.targets.clone();
            for target in &sweep {
                self.launch(target);
                self.reap_finished();

                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break 'sweeps,
                    () = sleep(self.config.pacing_interval) => {}
                }
            }
        }

        info!("Probe scheduler stopping");
        self.drain().await;
        info!("Probe scheduler stopped");
    }

    /// Query the provider once.
    ///
    /// Returns a retry delay when discovery failed and there is no
    /// previous list to fall back on.
    async fn refresh_targets(&mut self) -> Option<Duration> {
        match self.provider.discover().await {
            Ok(discovered) => {
                let targets = dedup_targets(discovered);
                self.backoff.reset();
                self.store.observe_discovery(Some(targets.len()));

                let evicted = self.store.retain_targets(&targets);
                if !evicted.is_empty() {
                    info!(evicted = ?evicted, "Evicted targets absent from discovery");
                }
                if targets != self.targets {
                    info!(
                        targets = targets.len(),
                        previous = self.targets.len(),
                        "Target list updated"
                    );
                }
                self.targets = targets;
                None
            }
            Err(e) => {
                self.store.observe_discovery(None);
                if self.targets.is_empty() {
                    let delay = self.backoff.next_delay();
                    warn!(
                        error = %e,
                        attempt = self.backoff.attempts(),
                        retry_in_ms = delay.as_millis(),
                        "Target discovery failed, no target list yet"
                    );
                    Some(delay)
                } else {
                    warn!(
                        error = %e,
                        targets = self.targets.len(),
                        "Target discovery failed, keeping previous target list"
                    );
                    None
                }
            }
        }
    }

    /// Spawn a probe for `target` without waiting for it.
    fn launch(&mut self, target: &Target) {
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        debug!(target = %target, sequence, "Launching probe");

        self.in_flight.spawn(run_probe(
            Arc::clone(&self.prober),
            Arc::clone(&self.store),
            target.clone(),
            self.config.sample_count,
            sequence,
        ));
    }

    /// Join finished probe tasks so the set only holds running ones.
    fn reap_finished(&mut self) {
        while let Some(joined) = self.in_flight.try_join_next() {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "Probe task panicked");
                }
            }
        }
    }

    /// Wait up to the grace period for in-flight probes, then abort the rest.
    async fn drain(&mut self) {
        self.reap_finished();
        let in_flight = self.in_flight.len();
        if in_flight == 0 {
            return;
        }

        info!(in_flight, "Waiting for in-flight probes");
        let in_flight_set = &mut self.in_flight;
        let timed_out = tokio::time::timeout(self.config.shutdown_grace, async move {
            while in_flight_set.join_next().await.is_some() {}
        })
        .await
        .is_err();

        if timed_out {
            warn!(
                remaining = self.in_flight.len(),
                "In-flight probes did not finish in time, aborting"
            );
            self.in_flight.abort_all();
        }
    }
}

/// One probe task: run the probe and record its result.
async fn run_probe(
    prober: Arc<dyn Prober>,
    store: Arc<dyn LatencyStore>,
    target: Target,
    sample_count: u32,
    sequence: u64,
) {
    match prober.probe(&target, sample_count, sequence).await {
        Ok(result) => match store.record(&result) {
            RecordOutcome::Recorded => info!(
                target = %result.target,
                avg_rtt_ms = result.average_rtt_ms,
                packet_loss = result.packet_loss,
                received = result.received,
                sent = result.sample_count,
                "Probe completed"
            ),
            RecordOutcome::Stale => debug!(
                target = %result.target,
                sequence,
                "Discarded result older than the stored one"
            ),
        },
        Err(e) => {
            store.observe_skip(&target);
            warn!(target = %target, error = %e, "Skipping target, probe could not run");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::adapters::metrics::LatencyRegistry;
    use crate::domain::probe::ProbeResult;
    use crate::ports::prober::ProbeError;
    use crate::ports::target_provider::DiscoveryError;

    /// Replays scripted discovery outcomes, repeating the last one.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<Vec<&'static str>, &'static str>>>,
        last: Mutex<Result<Vec<&'static str>, &'static str>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Vec<&'static str>, &'static str>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(Ok(Vec::new())),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TargetProvider for ScriptedProvider {
        async fn discover(&self) -> Result<Vec<Target>, DiscoveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            let outcome = match next {
                Some(outcome) => {
                    *self.last.lock().unwrap() = outcome.clone();
                    outcome
                }
                None => self.last.lock().unwrap().clone(),
            };
            outcome
                .map(|addrs| addrs.into_iter().map(Target::from).collect())
                .map_err(|e| DiscoveryError::Request(e.to_string()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    /// Answers with a fixed RTT per address after an optional delay.
    struct TableProber {
        rtts_us: HashMap<&'static str, u64>,
        delay: Duration,
        probes: AtomicUsize,
    }

    impl TableProber {
        fn new(rtts_us: &[(&'static str, u64)]) -> Arc<Self> {
            Arc::new(Self {
                rtts_us: rtts_us.iter().copied().collect(),
                delay: Duration::ZERO,
                probes: AtomicUsize::new(0),
            })
        }

        fn slow(rtts_us: &[(&'static str, u64)], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                rtts_us: rtts_us.iter().copied().collect(),
                delay,
                probes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Prober for TableProber {
        async fn probe(
            &self,
            target: &Target,
            sample_count: u32,
            sequence: u64,
        ) -> Result<ProbeResult, ProbeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            target.ip().map_err(|e| ProbeError::InvalidAddress {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            let rtts: Vec<Duration> = self
                .rtts_us
                .get(target.as_str())
                .map(|us| vec![Duration::from_micros(*us); sample_count as usize])
                .unwrap_or_default();
            Ok(ProbeResult::from_samples(
                target.clone(),
                sample_count,
                &rtts,
                sequence,
            ))
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            sample_count: 5,
            pacing_interval: Duration::from_millis(750),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
            shutdown_grace: Duration::from_secs(10),
        }
    }

    fn spawn_scheduler(
        provider: Arc<dyn TargetProvider>,
        prober: Arc<dyn Prober>,
        store: Arc<LatencyRegistry>,
        config: SchedulerConfig,
    ) -> (broadcast::Sender<()>, tokio::task::JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let scheduler = ProbeScheduler::new(provider, prober, store, config);
        (shutdown_tx, tokio::spawn(scheduler.run(shutdown_rx)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_records_every_target() {
        let provider = ScriptedProvider::new(vec![Ok(vec!["10.0.0.1", "10.0.0.2"])]);
        let prober = TableProber::new(&[("10.0.0.1", 1200), ("10.0.0.2", 3400)]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, prober, Arc::clone(&store), config());
        sleep(Duration::from_secs(2)).await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!((snapshot["10.0.0.1"] - 1.2).abs() < 1e-9);
        assert!((snapshot["10.0.0.2"] - 3.4).abs() < 1e-9);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_launches_are_paced() {
        let provider = ScriptedProvider::new(vec![Ok(vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"])]);
        let prober = TableProber::new(&[]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, Arc::clone(&prober) as Arc<dyn Prober>, store, config());

        // launches at 0ms and 750ms; the third is due at 1500ms
        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(prober.probes.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_discovery_records_nothing() {
        let provider = ScriptedProvider::new(vec![Ok(vec![])]);
        let prober = TableProber::new(&[]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) = spawn_scheduler(
            Arc::clone(&provider) as Arc<dyn TargetProvider>,
            prober,
            Arc::clone(&store),
            config(),
        );
        sleep(Duration::from_secs(3)).await;

        assert!(store.snapshot().is_empty());
        // rediscovers once per pacing interval while the list is empty
        assert!(provider.calls() >= 4);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_discovery_backs_off() {
        let provider = ScriptedProvider::new(vec![Err("apiserver down")]);
        let prober = TableProber::new(&[]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) = spawn_scheduler(
            Arc::clone(&provider) as Arc<dyn TargetProvider>,
            prober,
            Arc::clone(&store),
            config(),
        );

        // attempts at 0s, 1s, 3s, 7s, 11s (capped at 4s)
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(provider.calls(), 2);
        sleep(Duration::from_secs(9)).await;
        assert_eq!(provider.calls(), 5);
        assert!(store.snapshot().is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_keeps_previous_targets() {
        let provider = ScriptedProvider::new(vec![Ok(vec!["10.0.0.1"]), Err("timeout")]);
        let prober = TableProber::new(&[("10.0.0.1", 800)]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) = spawn_scheduler(
            Arc::clone(&provider) as Arc<dyn TargetProvider>,
            Arc::clone(&prober) as Arc<dyn Prober>,
            Arc::clone(&store),
            config(),
        );
        sleep(Duration::from_secs(5)).await;

        assert!(provider.calls() >= 3);
        assert!(prober.probes.load(Ordering::SeqCst) >= 3);
        assert!((store.snapshot()["10.0.0.1"] - 0.8).abs() < 1e-9);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_target_is_skipped() {
        let provider = ScriptedProvider::new(vec![Ok(vec!["not-an-ip", "10.0.0.2"])]);
        let prober = TableProber::new(&[("10.0.0.2", 500)]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, prober, Arc::clone(&store), config());
        sleep(Duration::from_secs(1)).await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("10.0.0.2"));
        assert_eq!(store.probe_count("skipped"), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_probe_records_sentinel() {
        let provider = ScriptedProvider::new(vec![Ok(vec!["10.0.0.9"])]);
        let prober = TableProber::new(&[]);
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, prober, Arc::clone(&store), config());
        sleep(Duration::from_millis(500)).await;

        assert_eq!(store.snapshot()["10.0.0.9"], -1.0);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_probes() {
        let provider = ScriptedProvider::new(vec![Ok(vec!["10.0.0.1"])]);
        let prober = TableProber::slow(&[("10.0.0.1", 2000)], Duration::from_secs(4));
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, prober, Arc::clone(&store), config());
        sleep(Duration::from_millis(100)).await;
        assert!(store.snapshot().is_empty());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
        assert!((store.snapshot()["10.0.0.1"] - 2.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_target_is_evicted() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec!["10.0.0.1", "10.0.0.2"]),
            Ok(vec!["10.0.0.1"]),
        ]);
        let prober = TableProber::new(&[("10.0.0.1", 1000), ("10.0.0.2", 1000)]);
        let store = Arc::new(LatencyRegistry::new(true, 2).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, prober, Arc::clone(&store), config());

        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(store.snapshot().len(), 2);

        // single-target sweeps take 750ms; two more discoveries evict 10.0.0.2
        sleep(Duration::from_secs(3)).await;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("10.0.0.1"));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_result_for_evicted_target_stays_evicted() {
        let provider = ScriptedProvider::new(vec![
            Ok(vec!["10.0.0.1", "10.0.0.2"]),
            Ok(vec!["10.0.0.1"]),
        ]);
        let prober = TableProber::slow(
            &[("10.0.0.1", 1000), ("10.0.0.2", 1000)],
            Duration::from_secs(5),
        );
        let store = Arc::new(LatencyRegistry::new(true, 3).unwrap());

        let (shutdown_tx, handle) =
            spawn_scheduler(provider, prober, Arc::clone(&store), config());

        // 10.0.0.2 leaves the window at t=3s, its only probe lands at t=5.75s
        sleep(Duration::from_secs(6)).await;
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("10.0.0.1"));
        assert!(!store.render().unwrap().contains("10.0.0.2"));
        assert_eq!(store.probe_count("stale"), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
