//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to verify that domain components and the latency
//! registry maintain their invariants across random inputs.

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;

use pod_latency_exporter::adapters::discovery::StaticProvider;
use pod_latency_exporter::adapters::metrics::LatencyRegistry;
use pod_latency_exporter::domain::backoff::ExponentialBackoff;
use pod_latency_exporter::domain::probe::{UNREACHABLE_RTT_MS, loss_ratio};
use pod_latency_exporter::domain::target::{dedup_targets, is_probe_target};
use pod_latency_exporter::domain::{ProbeResult, Target};
use pod_latency_exporter::ports::latency_store::LatencyStore;
use pod_latency_exporter::ports::target_provider::TargetProvider;

// ── Probe Aggregation Properties ────────────────────────────

proptest! {
    /// The average RTT lies between the fastest and slowest sample.
    #[test]
    fn average_rtt_within_sample_bounds(
        rtts_us in prop::collection::vec(1u64..5_000_000, 1..16),
    ) {
        let samples: Vec<Duration> = rtts_us.iter().copied().map(Duration::from_micros).collect();
        let count = u32::try_from(samples.len()).unwrap();
        let result = ProbeResult::from_samples(Target::from("10.0.0.1"), count, &samples, 1);

        let min_ms = *rtts_us.iter().min().unwrap() as f64 / 1000.0;
        let max_ms = *rtts_us.iter().max().unwrap() as f64 / 1000.0;
        prop_assert!(
            result.average_rtt_ms >= min_ms - 1e-9 && result.average_rtt_ms <= max_ms + 1e-9,
            "average {} outside [{min_ms}, {max_ms}]",
            result.average_rtt_ms
        );
        prop_assert!(result.is_reachable());
    }

    /// Loss ratio stays in [0, 1] and is total only with no replies.
    #[test]
    fn loss_ratio_in_unit_interval(sent in 0u32..1000, received in 0u32..1000) {
        let ratio = loss_ratio(sent, received);
        prop_assert!((0.0..=1.0).contains(&ratio), "ratio {ratio} out of range");
        if sent > 0 && received == 0 {
            prop_assert!((ratio - 1.0).abs() < f64::EPSILON);
        }
    }

    /// Replies beyond the requested count are ignored.
    #[test]
    fn received_never_exceeds_sample_count(
        sample_count in 1u32..10,
        extra in 0usize..10,
    ) {
        let samples = vec![Duration::from_millis(1); sample_count as usize + extra];
        let result = ProbeResult::from_samples(Target::from("10.0.0.1"), sample_count, &samples, 1);
        prop_assert_eq!(result.received, sample_count);
        prop_assert!(result.packet_loss.abs() < f64::EPSILON);
    }

    /// No samples always yields the unreachable sentinel with total loss.
    #[test]
    fn no_samples_is_unreachable(sample_count in 1u32..100) {
        let result = ProbeResult::from_samples(Target::from("10.0.0.1"), sample_count, &[], 1);
        prop_assert!((result.average_rtt_ms - UNREACHABLE_RTT_MS).abs() < f64::EPSILON);
        prop_assert!((result.packet_loss - 1.0).abs() < f64::EPSILON);
    }
}

// ── Backoff Properties ──────────────────────────────────────

proptest! {
    /// Delays never decrease and never exceed the cap.
    #[test]
    fn backoff_monotonic_and_capped(
        initial_ms in 1u64..5_000,
        max_ms in 1u64..120_000,
        attempts in 1usize..64,
    ) {
        let initial = Duration::from_millis(initial_ms);
        let max = Duration::from_millis(max_ms).max(initial);
        let mut backoff = ExponentialBackoff::new(initial, max);

        let mut previous = Duration::ZERO;
        for _ in 0..attempts {
            let delay = backoff.next_delay();
            prop_assert!(delay >= previous, "{delay:?} < {previous:?}");
            prop_assert!(delay <= max, "{delay:?} > cap {max:?}");
            previous = delay;
        }

        backoff.reset();
        prop_assert_eq!(backoff.next_delay(), initial);
    }
}

// ── Target List Properties ──────────────────────────────────

proptest! {
    /// Deduplication yields unique addresses in first-seen order.
    #[test]
    fn dedup_unique_and_order_preserving(
        octets in prop::collection::vec(0u8..8, 0..32),
    ) {
        let addresses: Vec<String> = octets.iter().map(|o| format!("10.0.0.{o}")).collect();
        let provider = StaticProvider::new(addresses.clone());
        let discovered = tokio_test::block_on(provider.discover()).unwrap();
        let deduped = dedup_targets(discovered);

        let mut seen = HashSet::new();
        let expected: Vec<&String> = addresses.iter().filter(|a| seen.insert(*a)).collect();
        prop_assert_eq!(deduped.len(), expected.len());
        for (target, address) in deduped.iter().zip(expected) {
            prop_assert_eq!(target.as_str(), address.as_str());
        }
    }

    /// A pod sharing its node's address is never a probe target.
    #[test]
    fn host_network_pods_excluded(octet in 0u8..=255) {
        let address = format!("192.168.1.{octet}");
        prop_assert!(!is_probe_target(&address, &address));
        let pod_address = format!("10.244.0.{octet}");
        prop_assert!(is_probe_target("192.168.0.1", &pod_address));
    }
}

// ── Registry Properties ─────────────────────────────────────

proptest! {
    /// Whatever order results arrive in, the latest launch wins.
    #[test]
    fn latest_launch_wins_regardless_of_arrival_order(
        arrivals in prop::collection::vec(1u64..100_000, 1..12)
            .prop_map(|rtts| rtts.into_iter().enumerate().map(|(i, rtt)| (i as u64 + 1, rtt)).collect::<Vec<_>>())
            .prop_shuffle(),
    ) {
        let registry = LatencyRegistry::new(true, 0).unwrap();
        let target = Target::from("10.0.0.1");

        let result_for = |sequence: u64, rtt_us: u64| {
            ProbeResult::from_samples(target.clone(), 1, &[Duration::from_micros(rtt_us)], sequence)
        };
        for (sequence, rtt_us) in &arrivals {
            registry.record(&result_for(*sequence, *rtt_us));
        }

        let (latest_sequence, latest_rtt) = *arrivals.iter().max_by_key(|(seq, _)| *seq).unwrap();
        let expected = result_for(latest_sequence, latest_rtt).average_rtt_ms;
        prop_assert!((registry.snapshot()["10.0.0.1"] - expected).abs() < 1e-12);
    }
}
