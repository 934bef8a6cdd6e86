use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fetch_throttle::{
    FetchOrchestrator, FetchTask, LimiterConfig, MemoryCache, OrchestratorConfig,
    PolitenessConfig, RateLimiter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn limiter() -> RateLimiter {
    // High rate so the hot key never runs dry mid-benchmark
    let config = LimiterConfig::new(1_000_000_000.0, 1_000_000, Duration::from_secs(3600)).unwrap();
    RateLimiter::new(config).unwrap()
}

/// Benchmark single-threaded admission throughput
fn bench_single_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_threaded");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("hot_key", |b| {
        let limiter = limiter();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(limiter.allow(black_box("203.0.113.7")));
            }
        })
    });

    group.bench_function("namespaced_key", |b| {
        let limiter = RateLimiter::new(LimiterConfig::ip().with_expiration(Duration::from_secs(3600)))
            .unwrap();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(limiter.allow(black_box("203.0.113.7")));
            }
        })
    });

    group.finish();
}

/// Benchmark admission across many distinct keys
fn bench_key_diversity(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_diversity");

    for key_count in [10usize, 1_000, 100_000] {
        let keys: Vec<String> = (0..key_count).map(|i| format!("10.0.{}.{}", i / 256, i % 256)).collect();
        group.throughput(Throughput::Elements(1000));

        group.bench_with_input(BenchmarkId::new("keys", key_count), &keys, |b, keys| {
            let limiter = limiter();
            let mut next = 0;
            b.iter(|| {
                for _ in 0..1000 {
                    black_box(limiter.allow(&keys[next % keys.len()]));
                    next += 1;
                }
            })
        });
    }

    group.finish();
}

/// Benchmark multi-threaded admission throughput
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");

    for num_threads in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((num_threads as u64) * 1000));

        group.bench_with_input(
            BenchmarkId::new("threads", num_threads),
            &num_threads,
            |b, &num_threads| {
                let limiter = limiter();
                b.iter(|| {
                    let handles: Vec<_> = (0..num_threads)
                        .map(|t| {
                            let limiter = limiter.clone();
                            std::thread::spawn(move || {
                                let key = format!("client-{t}");
                                for _ in 0..1000 {
                                    black_box(limiter.allow(&key));
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                })
            },
        );
    }

    group.finish();
}

/// Benchmark the cache-hit path of the orchestrator
fn bench_cache_hits(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = OrchestratorConfig::default().with_politeness(PolitenessConfig::none());
    let orchestrator = FetchOrchestrator::new(Arc::new(MemoryCache::new()), config).unwrap();
    let cancel = CancellationToken::new();

    let task = || {
        FetchTask::new("quotes", "quotes:hot", Duration::from_secs(3600), || async {
            Ok::<_, anyhow::Error>(vec![1.0f64; 16])
        })
    };
    runtime
        .block_on(orchestrator.fetch_one(task(), &cancel))
        .unwrap();

    c.bench_function("fetch_one_cache_hit", |b| {
        b.to_async(&runtime)
            .iter(|| async { black_box(orchestrator.fetch_one(task(), &cancel).await.unwrap()) })
    });
}

criterion_group!(
    benches,
    bench_single_key,
    bench_key_diversity,
    bench_concurrent,
    bench_cache_hits
);
criterion_main!(benches);
