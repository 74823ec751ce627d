//! Latency benchmarks for Fanout.
//!
//! These benchmarks focus on publish-to-receive latency.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fanout_bench::registry_with_subscribers;
use fanout_core::{Message, Registry, RegistryConfig};
use std::time::Instant;

/// Benchmark publish + receive latency.
fn bench_pubsub_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("pubsub_latency");

    group.bench_function("single_subscriber", |b| {
        b.iter_custom(|iters| {
            let (registry, mut subs) =
                registry_with_subscribers("test", 1, RegistryConfig::default());

            let start = Instant::now();
            for _ in 0..iters {
                registry.publish("test", vec![0u8; 64]);
                let _ = subs[0].try_recv();
            }
            start.elapsed()
        });
    });

    group.bench_function("ten_subscribers", |b| {
        b.iter_custom(|iters| {
            let (registry, mut subs) =
                registry_with_subscribers("test", 10, RegistryConfig::default());

            let start = Instant::now();
            for _ in 0..iters {
                registry.publish("test", vec![0u8; 64]);
                for sub in &mut subs {
                    let _ = sub.try_recv();
                }
            }
            start.elapsed()
        });
    });

    group.bench_function("async_recv", |b| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let (registry, mut subs) =
            registry_with_subscribers("test", 1, RegistryConfig::default());
        let mut sub = subs.remove(0);

        b.iter(|| {
            registry.publish("test", vec![0u8; 64]);
            runtime.block_on(sub.recv())
        });
    });

    group.finish();
}

/// Benchmark message creation latency.
fn bench_message_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_creation");

    group.bench_function("simple", |b| {
        b.iter(|| Message::new(black_box("test:topic"), black_box(vec![0u8; 64])))
    });

    group.finish();
}

/// Benchmark topic lookup.
fn bench_topic_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("topic_lookup");

    // Setup: 1000 topics with 10 subscribers each
    let registry = Registry::new();
    let mut subs = Vec::new();
    for i in 0..1000 {
        let topic = format!("topic:{}", i);
        for _ in 0..10 {
            subs.push(registry.subscribe(&topic));
        }
    }

    group.bench_function("topic_exists", |b| {
        let mut i = 0;
        b.iter(|| {
            let topic = format!("topic:{}", i % 1000);
            i += 1;
            registry.topic_exists(black_box(&topic))
        });
    });

    group.bench_function("subscriber_count", |b| {
        let mut i = 0;
        b.iter(|| {
            let topic = format!("topic:{}", i % 1000);
            i += 1;
            registry.subscriber_count(black_box(&topic))
        });
    });

    group.bench_function("prune_nothing_closed", |b| b.iter(|| registry.prune()));

    group.finish();
}

criterion_group!(
    benches,
    bench_pubsub_latency,
    bench_message_creation,
    bench_topic_lookup,
);
criterion_main!(benches);
