use crate::{
    Error, IdGenStatus, InMemorySegmentDistributor, Result, SegmentChain, SegmentChainConfig,
    SegmentChainGenerator, SegmentDistributor, TIME_TO_LIVE_FOREVER, TimeSource,
};
use futures::executor::block_on;
use futures::future::try_join_all;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::scope;

struct MockClock {
    secs: AtomicI64,
}

impl MockClock {
    fn at(secs: i64) -> Arc<Self> {
        Arc::new(Self {
            secs: AtomicI64::new(secs),
        })
    }

    fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimeSource for MockClock {
    fn current_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}

/// Hands out preset upper bounds, then fails.
struct ScriptedDistributor {
    step: i64,
    max_ids: Mutex<VecDeque<i64>>,
}

impl ScriptedDistributor {
    fn new(step: i64, max_ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            step,
            max_ids: Mutex::new(max_ids.into_iter().collect()),
        }
    }
}

impl SegmentDistributor for ScriptedDistributor {
    fn namespace(&self) -> &str {
        "scripted"
    }

    fn step(&self) -> i64 {
        self.step
    }

    async fn next_max_id(&self, _step: i64) -> Result<i64> {
        self.max_ids
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::DistributorUnavailable {
                namespace: "scripted".into(),
                reason: "script exhausted".into(),
            })
    }
}

/// Counts reservations and optionally fails while `down` is set.
struct CountingDistributor {
    inner: InMemorySegmentDistributor,
    calls: AtomicUsize,
    down: AtomicBool,
}

impl CountingDistributor {
    fn new(step: i64) -> Self {
        Self {
            inner: InMemorySegmentDistributor::new("counting", step).unwrap(),
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }
}

impl SegmentDistributor for CountingDistributor {
    fn namespace(&self) -> &str {
        self.inner.namespace()
    }

    fn step(&self) -> i64 {
        self.inner.step()
    }

    async fn next_max_id(&self, step: i64) -> Result<i64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::DistributorUnavailable {
                namespace: self.namespace().into(),
                reason: "connection refused".into(),
            });
        }
        self.inner.next_max_id(step).await
    }
}

trait IdGenStatusExt {
    fn unwrap_ready(self) -> i64;
    fn unwrap_exhausted(self) -> Arc<SegmentChain>;
}

impl IdGenStatusExt for IdGenStatus {
    fn unwrap_ready(self) -> i64 {
        match self {
            IdGenStatus::Ready { id } => id,
            IdGenStatus::Exhausted { tail } => {
                panic!("unexpected exhausted (tail version: {})", tail.version())
            }
        }
    }

    fn unwrap_exhausted(self) -> Arc<SegmentChain> {
        match self {
            IdGenStatus::Ready { id } => panic!("unexpected ready ({id})"),
            IdGenStatus::Exhausted { tail } => tail,
        }
    }
}

fn config(ttl: i64, safe_distance: i64) -> SegmentChainConfig {
    SegmentChainConfig::new(ttl, safe_distance).unwrap()
}

fn stock<D, T>(generator: &SegmentChainGenerator<D, T>, blocks: usize)
where
    D: SegmentDistributor + 'static,
    T: TimeSource + Send + Sync + 'static,
{
    let mut tail = generator.head().last();
    for _ in 0..blocks {
        let distributor = generator.distributor();
        let extended = block_on(tail.ensure_append_next(|previous: &SegmentChain| {
            distributor.next_segment_chain(previous.version(), 1, TIME_TO_LIVE_FOREVER, 0)
        }))
        .unwrap();
        tail = extended.last();
    }
}

#[test]
fn fresh_generator_is_exhausted_at_root() {
    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        SegmentChainConfig::default(),
        MockClock::at(0),
    );
    let tail = generator.try_next_id().unwrap_exhausted();
    assert_eq!(tail.version(), -1);
    assert_eq!(generator.head_version(), -1);
}

#[test]
fn first_call_fetches_synchronously() {
    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 2),
        MockClock::at(0),
    );
    assert_eq!(generator.next_id().unwrap(), 0);
    assert_eq!(generator.head_version(), 0);
    // Synchronous fetches reserve the safe distance in one round trip.
    assert_eq!(generator.distributor().max_id(), 20);
    assert_eq!(generator.try_next_id().unwrap_ready(), 1);
}

#[test]
fn sequential_ids_span_segments() {
    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 7).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    for expected in 0..100 {
        assert_eq!(generator.next_id().unwrap(), expected);
    }
}

#[test]
fn three_prefetched_segments_serve_2500_concurrent_calls() {
    const THREADS: usize = 10;
    const PER_THREAD: usize = 250;

    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 1000).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    stock(&generator, 3);
    assert_eq!(generator.distributor().max_id(), 3000);

    let seen = Mutex::new(Vec::with_capacity(THREADS * PER_THREAD));
    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let ids: Vec<_> = (0..PER_THREAD)
                    .map(|_| generator.next_id().unwrap())
                    .collect();
                seen.lock().unwrap().extend(ids);
            });
        }
    });

    let mut ids = seen.into_inner().unwrap();
    ids.sort_unstable();
    assert_eq!(ids, (0..2500).collect::<Vec<i64>>());
    assert_eq!(generator.distributor().max_id(), 3000);
}

#[test]
fn threaded_ids_are_unique_under_synchronous_fetches() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 2000;

    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    let seen = Mutex::new(HashSet::with_capacity(THREADS * PER_THREAD));

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let ids: Vec<_> = (0..PER_THREAD)
                    .map(|_| generator.next_id().unwrap())
                    .collect();
                let mut seen = seen.lock().unwrap();
                for id in ids {
                    assert!(seen.insert(id), "duplicate id {id}");
                }
            });
        }
    });

    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.len(), THREADS * PER_THREAD);
    let max_id = generator.distributor().max_id();
    assert!(seen.iter().all(|&id| (0..max_id).contains(&id)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn async_ids_are_unique() -> Result<()> {
    const TASKS: usize = 32;
    const PER_TASK: usize = 1000;

    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 64).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 2),
        MockClock::at(0),
    );

    let tasks: Vec<tokio::task::JoinHandle<Result<Vec<i64>>>> = (0..TASKS)
        .map(|_| {
            let generator = generator.clone();
            tokio::spawn(async move {
                let mut ids = Vec::with_capacity(PER_TASK);
                for _ in 0..PER_TASK {
                    ids.push(generator.next_id_async().await?);
                }
                Ok(ids)
            })
        })
        .collect();

    let all_ids: Vec<_> = try_join_all(tasks)
        .await
        .unwrap()
        .into_iter()
        .flat_map(Result::unwrap)
        .collect();
    assert_eq!(all_ids.len(), TASKS * PER_TASK);

    let mut seen = HashSet::with_capacity(all_ids.len());
    for id in &all_ids {
        assert!(seen.insert(id), "Duplicate ID found: {id}");
    }
    Ok(())
}

#[test]
fn racing_callers_reach_the_distributor_once() {
    const THREADS: usize = 16;

    let generator = SegmentChainGenerator::from_components(
        CountingDistributor::new(1_000_000),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| generator.next_id().unwrap());
        }
    });
    assert_eq!(generator.distributor().calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.sync_extensions(), 1);
}

#[test]
fn stocked_chain_needs_no_synchronous_extension() {
    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    stock(&generator, 2);
    for expected in 0..20 {
        assert_eq!(generator.next_id().unwrap(), expected);
    }
    assert_eq!(generator.sync_extensions(), 0);

    assert_eq!(generator.next_id().unwrap(), 20);
    assert_eq!(generator.sync_extensions(), 1);
}

#[test]
fn head_version_never_decreases() {
    const THREADS: usize = 4;

    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 5).unwrap(),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    let done = AtomicBool::new(false);

    scope(|s| {
        s.spawn(|| {
            let mut last = generator.head_version();
            while !done.load(Ordering::SeqCst) {
                let version = generator.head_version();
                assert!(version >= last, "head went back from {last} to {version}");
                last = version;
            }
        });
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    for _ in 0..5000 {
                        generator.next_id().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
    });
}

#[test]
fn distributor_failure_leaves_chain_untouched() {
    let generator = SegmentChainGenerator::from_components(
        CountingDistributor::new(10),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    generator.distributor().down.store(true, Ordering::SeqCst);

    let err = generator.next_id().unwrap_err();
    assert!(matches!(err, Error::DistributorUnavailable { .. }));
    assert_eq!(generator.head_version(), -1);
    assert!(generator.head().next().is_none());
    assert_eq!(generator.sync_extensions(), 0);

    generator.distributor().down.store(false, Ordering::SeqCst);
    assert_eq!(generator.next_id().unwrap(), 0);
}

#[test]
fn stale_segment_is_given_up_and_retried() {
    let generator = SegmentChainGenerator::from_components(
        ScriptedDistributor::new(10, [10, 10, 20]),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    for expected in 0..10 {
        assert_eq!(generator.next_id().unwrap(), expected);
    }
    // The second reservation repeats [0, 10) and is discarded.
    assert_eq!(generator.next_id().unwrap(), 10);
    assert_eq!(generator.head().segment().offset(), 10);
    assert_eq!(generator.head_version(), 1);
}

#[test]
fn expired_segment_is_skipped() {
    let clock = MockClock::at(1_000);
    let generator = SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", 100).unwrap(),
        config(5, 1),
        Arc::clone(&clock),
    );
    assert_eq!(generator.next_id().unwrap(), 0);

    clock.advance(10);
    let id = generator.next_id().unwrap();
    assert_eq!(id, 100);
    assert_eq!(generator.head().segment().fetch_time(), 1_010);
}

#[test]
fn exhausted_distributor_surfaces_error() {
    let generator = SegmentChainGenerator::from_components(
        ScriptedDistributor::new(2, [2]),
        config(TIME_TO_LIVE_FOREVER, 1),
        MockClock::at(0),
    );
    assert_eq!(generator.next_id().unwrap(), 0);
    assert_eq!(generator.next_id().unwrap(), 1);
    assert!(matches!(
        generator.next_id(),
        Err(Error::DistributorUnavailable { .. })
    ));
}
