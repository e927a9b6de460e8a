use std::sync::{Arc, Barrier};
use std::thread;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use globalru::prelude::*;

const ENTRY_BYTES: u64 = 64;
const RESIDENT: u64 = 4096;

fn cache(concurrency_level: usize) -> GlobalLruCache<u64, u64> {
    GlobalLruBuilder::new(RESIDENT * ENTRY_BYTES)
        .concurrency_level(concurrency_level)
        .initial_cache_capacity(RESIDENT as usize)
        .try_build()
        .unwrap()
}

fn warmed(concurrency_level: usize) -> GlobalLruCache<u64, u64> {
    let cache = cache(concurrency_level);
    for i in 0..RESIDENT {
        cache.put(i, i, ENTRY_BYTES).unwrap();
    }
    cache
}

fn strategy_name(level: usize) -> String {
    if level == 0 {
        "buffered".to_string()
    } else {
        format!("striped_{level}")
    }
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_hit");
    for level in [0, 1, 16] {
        let cache = warmed(level);
        group.bench_function(BenchmarkId::from_parameter(strategy_name(level)), |b| {
            let mut i = 0u64;
            b.iter(|| {
                i = (i + 1) % RESIDENT;
                std::hint::black_box(cache.get(&std::hint::black_box(i)))
            })
        });
    }
    group.finish();
}

fn bench_eviction_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("eviction_churn");
    for level in [0, 1, 16] {
        group.bench_function(BenchmarkId::from_parameter(strategy_name(level)), |b| {
            b.iter_batched(
                || warmed(level),
                |cache| {
                    for i in 0..RESIDENT {
                        let _ = cache.put(std::hint::black_box(RESIDENT + i), i, ENTRY_BYTES);
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_contended_mixed(c: &mut Criterion) {
    const THREADS: usize = 8;
    const OPS: u64 = 2_000;

    let mut group = c.benchmark_group("contended_mixed");
    group.sample_size(20);
    for level in [0, 16] {
        group.bench_function(BenchmarkId::from_parameter(strategy_name(level)), |b| {
            b.iter_batched(
                || warmed(level),
                |cache| {
                    let barrier = Arc::new(Barrier::new(THREADS));
                    let handles: Vec<_> = (0..THREADS as u64)
                        .map(|t| {
                            let worker = cache.worker();
                            let barrier = Arc::clone(&barrier);
                            thread::spawn(move || {
                                barrier.wait();
                                for i in 0..OPS {
                                    let key = (t * 7_919 + i * 31) % (RESIDENT * 2);
                                    if i % 4 == 0 {
                                        let _ = worker.put(key, i, ENTRY_BYTES);
                                    } else {
                                        std::hint::black_box(worker.get(&key));
                                    }
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_get_hit,
    bench_eviction_churn,
    bench_contended_mixed
);
criterion_main!(benches);
