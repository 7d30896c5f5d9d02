//! Throughput benchmarks for Beacon.
//!
//! These benchmarks measure the raw throughput of the envelope codec and the
//! hub fan-out path.

use beacon_protocol::{codec, ClientEvent, Envelope};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Instant;
use tenvis_beacon_bench::{hub, members, message_created};
use tenvis_beacon_core::{BroadcastMessage, HubConfig};

/// Benchmark envelope decoding, as done by the event bridge.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [64usize, 1024, 16 * 1024] {
        let encoded = message_created("c1", size);
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            b.iter(|| codec::decode(black_box(encoded)));
        });
    }

    group.finish();
}

/// Benchmark envelope encoding of broker-originated events.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    let join = Envelope::presence_join("c1", "u1", "Ann");
    group.bench_function("presence_join", |b| {
        b.iter(|| codec::encode(black_box(&join)));
    });

    let typing = Envelope::typing_start("c1", "u1", "Ann", Some("t1"));
    group.bench_function("typing_start", |b| {
        b.iter(|| codec::encode(black_box(&typing)));
    });

    group.finish();
}

/// Benchmark client message parsing.
fn bench_client_parse(c: &mut Criterion) {
    let typing = br#"{"type":"typing:start","data":{"threadId":"t1"}}"#;
    c.bench_function("client_parse/typing_start", |b| {
        b.iter(|| ClientEvent::parse(black_box(typing)));
    });
}

/// Benchmark fan-out to every connection of one channel.
fn bench_fanout(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("fanout");

    for size in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let hub = runtime.block_on(async { hub(HubConfig::default()) });
            let mut receivers = runtime.block_on(members(&hub, "c1", size, 1024));
            let payload = message_created("c1", 256);

            b.iter_custom(|iters| {
                runtime.block_on(async {
                    let start = Instant::now();
                    for _ in 0..iters {
                        hub.broadcast(BroadcastMessage::new("c1", payload.clone()));
                        for rx in &mut receivers {
                            let _ = rx.recv().await;
                        }
                    }
                    start.elapsed()
                })
            });
        });
    }

    group.finish();
}

/// Benchmark broadcasts spread over many channels and buckets.
fn bench_many_channels(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    c.bench_function("fanout/256_channels", |b| {
        let hub = runtime.block_on(async { hub(HubConfig::default()) });
        let channels: Vec<String> = (0..256).map(|i| format!("c{i}")).collect();
        let mut receivers = Vec::new();
        for channel in &channels {
            receivers.extend(runtime.block_on(members(&hub, channel, 4, 1024)));
        }
        let payloads: Vec<_> = channels.iter().map(|c| message_created(c, 64)).collect();

        b.iter_custom(|iters| {
            runtime.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    for (channel, payload) in channels.iter().zip(&payloads) {
                        hub.broadcast(BroadcastMessage::new(channel.clone(), payload.clone()));
                    }
                    for rx in &mut receivers {
                        let _ = rx.recv().await;
                    }
                }
                start.elapsed()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_decode,
    bench_encode,
    bench_client_parse,
    bench_fanout,
    bench_many_channels,
);
criterion_main!(benches);
