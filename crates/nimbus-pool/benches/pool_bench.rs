//! Benchmarks for the Nimbus peer pool
//!
//! Measures performance of:
//! - Derived statistics recomputation
//! - Snapshot merge
//! - Snapshot parsing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nimbus_pool::{Channel, NodeId, PeerPool, PEER_MAX};

fn full_pool(owner: u32) -> PeerPool {
    let mut pool = PeerPool::new(NodeId(owner), Channel((owner % 8) as u16));
    for i in 1..=PEER_MAX as u32 {
        pool.add_peer(NodeId(owner + i), Some(Channel((i % 8) as u16)));
    }
    pool
}

/// Benchmark recomputation after a mutation, at different pool sizes
fn bench_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute");

    for &size in &[1usize, 4, 8, PEER_MAX] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut pool = PeerPool::new(NodeId(0), Channel(3));
            for i in 1..=size as u32 {
                pool.add_peer(NodeId(i), Some(Channel((i % 8) as u16)));
            }
            b.iter(|| {
                pool.mark_stale(NodeId(1));
                pool.add_peer(NodeId(1), None);
                black_box(pool.rank_local())
            })
        });
    }
    group.finish();
}

/// Benchmark merging a full remote pool
fn bench_merge(c: &mut Criterion) {
    let remote = full_pool(1_000);
    c.bench_function("merge_full", |b| {
        b.iter(|| {
            let mut local = PeerPool::new(NodeId(1), Channel(2));
            local.merge(black_box(&remote));
            black_box(local.distinct_channel_count())
        })
    });
}

/// Benchmark parsing a full snapshot
fn bench_parse(c: &mut Criterion) {
    let wire = full_pool(1_000).serialize();
    c.bench_function("parse_full", |b| {
        b.iter(|| PeerPool::parse(black_box(&wire), NodeId(1_000)))
    });
}

criterion_group!(benches, bench_recompute, bench_merge, bench_parse);
criterion_main!(benches);
