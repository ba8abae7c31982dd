use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::executor::block_on;
use futures::future::try_join_all;
use segid::{
    IdGenStatus, InMemorySegmentDistributor, Result, SegmentChainConfig, SegmentChainGenerator,
    TIME_TO_LIVE_FOREVER, TimeSource,
};
use std::{
    sync::{Arc, Barrier},
    thread::scope,
    time::Instant,
};
use tokio::runtime::Builder;

struct FixedMockTime {
    secs: i64,
}

impl TimeSource for FixedMockTime {
    fn current_secs(&self) -> i64 {
        self.secs
    }
}

type BenchGenerator = SegmentChainGenerator<InMemorySegmentDistributor, FixedMockTime>;

// Number of IDs generated per benchmark iteration (split across threads for
// contended runs).
const TOTAL_IDS: usize = 4096;

/// A generator whose chain already holds every ID a run will ask for.
fn stocked_generator() -> BenchGenerator {
    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("bench", TOTAL_IDS as i64).unwrap(),
        SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, 2).unwrap(),
        FixedMockTime { secs: 1 },
    );
    block_on(generator.prefetch_job().prefetch());
    generator
}

/// A generator that must reach the distributor every `step` IDs.
fn refilling_generator(step: i64) -> BenchGenerator {
    SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("bench", step).unwrap(),
        SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, 1).unwrap(),
        FixedMockTime { secs: 1 },
    )
}

/// Benchmarks the hot path where IDs are always `Ready`.
fn bench_generator(c: &mut Criterion, group_name: &str, generator_factory: impl Fn() -> BenchGenerator) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = core::time::Duration::ZERO;
            for _ in 0..iters {
                let generator = generator_factory();
                let start = Instant::now();
                for _ in 0..TOTAL_IDS {
                    match generator.try_next_id() {
                        IdGenStatus::Ready { id } => {
                            black_box(id);
                        }
                        IdGenStatus::Exhausted { .. } => unreachable!(),
                    }
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    group.finish();
}

/// Benchmarks `next_id`, including synchronous refills.
fn bench_generator_refill(
    c: &mut Criterion,
    group_name: &str,
    generator_factory: impl Fn() -> BenchGenerator,
) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{}", TOTAL_IDS), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let generator = generator_factory();
                for _ in 0..TOTAL_IDS {
                    black_box(generator.next_id().unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_generator_contended(
    c: &mut Criterion,
    group_name: &str,
    generator_factory: impl Fn() -> BenchGenerator,
) {
    let mut group = c.benchmark_group(group_name);

    for thread_count in [1, 2, 4, 8, 16] {
        let ids_per_thread = TOTAL_IDS / thread_count;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(
            format!("elems/{}/threads/{}", TOTAL_IDS, thread_count),
            |b| {
                b.iter_custom(|iters| {
                    let start = Instant::now();

                    for _ in 0..iters {
                        let generator = Arc::new(generator_factory());
                        let barrier = Arc::new(Barrier::new(thread_count + 1));
                        scope(|s| {
                            for _ in 0..thread_count {
                                let generator = Arc::clone(&generator);
                                let barrier = Arc::clone(&barrier);
                                s.spawn(move || {
                                    barrier.wait();
                                    for _ in 0..ids_per_thread {
                                        black_box(generator.next_id().unwrap());
                                    }
                                });
                            }
                            barrier.wait();
                        });
                    }

                    start.elapsed()
                });
            },
        );
    }

    group.finish();
}

fn bench_generator_async_tokio(
    c: &mut Criterion,
    group_name: &str,
    generator_factory: impl Fn() -> BenchGenerator + Copy,
) {
    let mut group = c.benchmark_group(group_name);

    for task_count in [1, 2, 4, 8] {
        let ids_per_task = TOTAL_IDS / task_count;

        group.throughput(Throughput::Elements(TOTAL_IDS as u64));
        group.bench_function(format!("elems/{}/tasks/{}", TOTAL_IDS, task_count), |b| {
            let rt = Builder::new_multi_thread()
                .enable_all()
                .worker_threads(4)
                .build()
                .unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let start = Instant::now();

                for _ in 0..iters {
                    let generator = generator_factory();
                    let tasks: Vec<tokio::task::JoinHandle<Result<()>>> = (0..task_count)
                        .map(|_| {
                            let generator = generator.clone();
                            tokio::spawn(async move {
                                for _ in 0..ids_per_task {
                                    black_box(generator.next_id_async().await?);
                                }
                                Ok(())
                            })
                        })
                        .collect();
                    for result in try_join_all(tasks).await.unwrap() {
                        result.unwrap();
                    }
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

fn benchmark_mock_sequential(c: &mut Criterion) {
    bench_generator(c, "mock/sequential/stocked", stocked_generator);
}

fn benchmark_mock_refill(c: &mut Criterion) {
    bench_generator_refill(c, "mock/sequential/refill_64", || refilling_generator(64));
}

fn benchmark_mock_contended(c: &mut Criterion) {
    bench_generator_contended(c, "mock/contended/stocked", stocked_generator);
}

fn benchmark_mock_contended_refill(c: &mut Criterion) {
    bench_generator_contended(c, "mock/contended/refill_64", || refilling_generator(64));
}

fn benchmark_mock_tokio(c: &mut Criterion) {
    bench_generator_async_tokio(c, "mock/tokio/refill_256", || refilling_generator(256));
}

criterion_group!(
    benches,
    // Hot path only
    benchmark_mock_sequential,
    benchmark_mock_contended,
    // Synchronous refills on exhaustion
    benchmark_mock_refill,
    benchmark_mock_contended_refill,
    // Async
    benchmark_mock_tokio,
);
criterion_main!(benches);
