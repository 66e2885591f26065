//! Benchmark suite for key index operations.

use cache_index::KeyIndex;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;

fn hash(i: u64) -> u32 {
    (i.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32) as u32
}

fn key(i: u64) -> Vec<u8> {
    format!("key-{i}").into_bytes()
}

/// Benchmark insertion into an index that is large enough to never grow.
fn insert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [1_000u64, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let index = KeyIndex::new(18).unwrap();
                for i in 0..size {
                    index.insert(Arc::new(key(i)), black_box(hash(i)));
                }
            });
        });
    }
    group.finish();
}

/// Benchmark insertion into a small index while the migration worker grows it.
fn insert_with_expansion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_with_expansion");

    for size in [10_000u64, 100_000].iter() {
        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let index = KeyIndex::builder().hash_power(4).build().unwrap();
                index.start_migration_worker().unwrap();
                for i in 0..size {
                    index.insert(Arc::new(key(i)), black_box(hash(i)));
                }
                index.stop_migration_worker().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark lookups on a pre-populated index.
fn find_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("find");

    for size in [1_000u64, 100_000].iter() {
        let index = KeyIndex::new(16).unwrap();
        let keys = (0..*size).map(key).collect::<Vec<_>>();
        for (i, k) in keys.iter().enumerate() {
            index.insert(Arc::new(k.clone()), hash(i as u64));
        }

        group.throughput(Throughput::Elements(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                for (i, k) in keys.iter().enumerate() {
                    black_box(index.find(k, hash(i as u64)));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    insert_benchmark,
    insert_with_expansion_benchmark,
    find_benchmark
);
criterion_main!(benches);
