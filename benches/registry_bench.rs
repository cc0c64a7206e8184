//! Latency Registry Benchmarks - Record and Scrape Hot Paths
//!
//! Every finished probe takes the registry lock once, and every scrape
//! renders the full text exposition under the same lock.
//!
//! Run with: cargo bench --bench registry_bench

use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use pod_latency_exporter::adapters::metrics::LatencyRegistry;
use pod_latency_exporter::domain::probe::mean_rtt_ms;
use pod_latency_exporter::domain::{ProbeResult, Target};
use pod_latency_exporter::ports::latency_store::LatencyStore;

fn populated_registry(targets: usize) -> LatencyRegistry {
    let registry = LatencyRegistry::new(true, 3).expect("registry");
    for i in 0..targets {
        let target = Target::new(format!("10.{}.{}.{}", i / 65_536, (i / 256) % 256, i % 256));
        let rtts = [Duration::from_micros(800 + i as u64); 5];
        registry.record(&ProbeResult::from_samples(target, 5, &rtts, i as u64 + 1));
    }
    registry
}

/// Benchmark RTT aggregation for one probe run.
fn bench_mean_rtt(c: &mut Criterion) {
    let rtts: Vec<Duration> = (0..5).map(|i| Duration::from_micros(900 + i * 37)).collect();

    c.bench_function("mean_rtt_5_samples", |b| {
        b.iter(|| {
            let _avg = mean_rtt_ms(black_box(&rtts));
        });
    });
}

/// Benchmark recording a result for an existing label.
fn bench_record(c: &mut Criterion) {
    let registry = populated_registry(500);
    let target = Target::from("10.0.1.10");
    let rtts = [Duration::from_micros(1_234); 5];
    let mut sequence = 1_000_u64;

    c.bench_function("registry_record_existing_label", |b| {
        b.iter(|| {
            sequence += 1;
            let result = ProbeResult::from_samples(target.clone(), 5, &rtts, sequence);
            let _outcome = registry.record(black_box(&result));
        });
    });
}

/// Benchmark a full scrape of 500 targets.
fn bench_render(c: &mut Criterion) {
    let registry = populated_registry(500);

    c.bench_function("registry_render_500_targets", |b| {
        b.iter(|| {
            let _body = registry.render().expect("render");
        });
    });
}

criterion_group!(benches, bench_mean_rtt, bench_record, bench_render);
criterion_main!(benches);
