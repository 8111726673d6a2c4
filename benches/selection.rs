#![allow(clippy::all)]
//! Benchmarks for target selection.
//!
//! Covers round-robin and least-outstanding-requests over growing groups,
//! sticky selection, health recording, and selection under contention.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use r0n_elb::modules::health::ProbeOutcome;
use r0n_elb::modules::target_group::{
    Algorithm, SelectionContext, TargetGroup, TargetGroupConfig, TargetProtocol, TargetSpec,
};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

fn make_group(algorithm: Algorithm, count: usize) -> TargetGroup {
    let mut config = TargetGroupConfig::new("bench", TargetProtocol::Http, 8080);
    config.algorithm = algorithm;
    config.health_check.enabled = false;
    let group = TargetGroup::new(&config, Arc::default()).unwrap();
    for i in 0..count {
        let spec = TargetSpec::new(format!("10.{}.{}.{}", i / 65536, (i / 256) % 256, i % 256));
        group.register(spec).unwrap();
    }
    group
}

fn bench_algorithms(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection/algorithm");
    let context = SelectionContext::new();

    for count in [3, 10, 50, 200] {
        let round_robin = make_group(Algorithm::RoundRobin, count);
        group.bench_with_input(BenchmarkId::new("round_robin", count), &count, |b, _| {
            b.iter(|| black_box(round_robin.select(&context).unwrap()));
        });

        let least = make_group(Algorithm::LeastOutstandingRequests, count);
        group.bench_with_input(
            BenchmarkId::new("least_outstanding_requests", count),
            &count,
            |b, _| {
                b.iter(|| black_box(least.select(&context).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_sticky(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection/sticky");

    let mut config = TargetGroupConfig::new("sticky", TargetProtocol::Http, 8080);
    config.health_check.enabled = false;
    config.stickiness.enabled = true;
    let targets = TargetGroup::new(&config, Arc::default()).unwrap();
    for i in 0..10 {
        targets.register(TargetSpec::new(format!("10.0.0.{i}"))).unwrap();
    }

    let (_, cookie) = targets
        .select(&SelectionContext::new())
        .unwrap()
        .into_parts();
    let cookie = cookie.unwrap();
    let pinned = SelectionContext::new().with_cookie(cookie.name, cookie.value);

    group.bench_function("pinned", |b| {
        b.iter(|| black_box(targets.select(&pinned).unwrap()));
    });
    group.bench_function("fresh", |b| {
        let context = SelectionContext::new();
        b.iter(|| black_box(targets.select(&context).unwrap()));
    });

    group.finish();
}

fn bench_health_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection/health");

    let config = TargetGroupConfig::new("checked", TargetProtocol::Http, 8080);
    let targets = TargetGroup::new(&config, Arc::default()).unwrap();
    let id = targets.register(TargetSpec::new("10.0.0.1")).unwrap();

    group.bench_function("record_success", |b| {
        b.iter(|| {
            black_box(
                targets
                    .record_health(id, ProbeOutcome::Success, Instant::now())
                    .unwrap(),
            )
        });
    });

    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection/contention");
    group.sample_size(20);

    for threads in [2, 4, 8] {
        let targets = Arc::new(make_group(Algorithm::LeastOutstandingRequests, 20));
        group.bench_with_input(BenchmarkId::new("select_x1000", threads), &threads, |b, &n| {
            b.iter(|| {
                let handles: Vec<_> = (0..n)
                    .map(|_| {
                        let targets = Arc::clone(&targets);
                        thread::spawn(move || {
                            let context = SelectionContext::new();
                            for _ in 0..1000 {
                                black_box(targets.select(&context).unwrap());
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_algorithms,
    bench_sticky,
    bench_health_recording,
    bench_contention,
);
criterion_main!(benches);
