use crate::{
    Error, HUNGER_THRESHOLD, InMemorySegmentDistributor, JobStatus, MAX_PREFETCH_DISTANCE,
    PrefetchScheduler, PrefetchWorkerExecutor, SegmentChainConfig, SegmentChainGenerator,
    TIME_TO_LIVE_FOREVER, TimeSource,
};
use futures::executor::block_on;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

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

type TestGenerator = SegmentChainGenerator<InMemorySegmentDistributor, Arc<MockClock>>;

fn generator(step: i64, safe_distance: i64, clock: &Arc<MockClock>) -> TestGenerator {
    SegmentChainGenerator::from_components(
        InMemorySegmentDistributor::new("orders", step).unwrap(),
        SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, safe_distance).unwrap(),
        Arc::clone(clock),
    )
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn first_pass_stocks_safe_distance() {
    let clock = MockClock::at(1_000);
    let generator = generator(100, 3, &clock);
    let job = generator.prefetch_job();

    assert_eq!(block_on(job.prefetch()), JobStatus::Continue);
    assert_eq!(job.prefetch_distance(), 3);

    let tail = generator.head().last();
    assert_eq!(tail.segment().offset(), 0);
    assert_eq!(tail.segment().max_id(), 300);
    assert_eq!(tail.segment().segments(), 3);
    assert_eq!(generator.distributor().max_id(), 300);
}

#[test]
fn stocked_chain_skips_the_store() {
    let clock = MockClock::at(1_000);
    let generator = generator(100, 2, &clock);
    let job = generator.prefetch_job();

    block_on(job.prefetch());
    let reserved = generator.distributor().max_id();
    block_on(job.prefetch());
    assert_eq!(generator.distributor().max_id(), reserved);
}

#[test]
fn consumption_tops_the_chain_back_up() {
    let clock = MockClock::at(1_000);
    let generator = generator(100, 2, &clock);
    let job = generator.prefetch_job();

    block_on(job.prefetch());
    for expected in 0..100 {
        assert_eq!(generator.next_id().unwrap(), expected);
    }

    block_on(job.prefetch());
    // One block consumed, one topped up.
    assert_eq!(generator.distributor().max_id(), 300);
}

#[test]
fn hunger_doubles_up_to_the_ceiling() {
    let clock = MockClock::at(1_000);
    let generator = generator(1, 10, &clock);
    let job = generator.prefetch_job();

    let mut previous = job.prefetch_distance();
    for _ in 0..40 {
        job.hungry(clock.current_secs());
        block_on(job.prefetch());
        let distance = job.prefetch_distance();
        assert!(distance <= MAX_PREFETCH_DISTANCE);
        assert!(distance >= previous);
        previous = distance;
    }
    assert_eq!(job.prefetch_distance(), MAX_PREFETCH_DISTANCE);
}

#[test]
fn satiety_halves_down_to_safe_distance() {
    let clock = MockClock::at(1_000);
    let generator = generator(10, 4, &clock);
    let job = generator.prefetch_job();

    for _ in 0..5 {
        job.hungry(clock.current_secs());
        block_on(job.prefetch());
    }
    assert_eq!(job.prefetch_distance(), 4 << 5);

    clock.advance(HUNGER_THRESHOLD + 1);
    let mut previous = job.prefetch_distance();
    for _ in 0..10 {
        block_on(job.prefetch());
        let distance = job.prefetch_distance();
        assert!(distance <= previous);
        assert!(distance >= 4);
        previous = distance;
    }
    assert_eq!(job.prefetch_distance(), 4);
}

#[test]
fn hungry_pass_reserves_prefetch_distance() {
    let clock = MockClock::at(1_000);
    let generator = generator(10, 2, &clock);
    let job = generator.prefetch_job();

    block_on(job.prefetch());
    job.hungry(clock.current_secs());
    block_on(job.prefetch());

    let tail = generator.head().last();
    assert_eq!(tail.segment().segments(), 4);
    assert_eq!(tail.segment().step(), 40);
}

#[test]
fn job_finishes_once_generator_is_dropped() {
    let clock = MockClock::at(0);
    let generator = generator(10, 1, &clock);
    let job = Arc::clone(generator.prefetch_job());
    assert_eq!(block_on(job.prefetch()), JobStatus::Continue);

    drop(generator);
    assert_eq!(block_on(job.prefetch()), JobStatus::Finished);
}

#[test]
fn executor_rejects_bad_configuration() {
    assert!(matches!(
        PrefetchWorkerExecutor::new(Duration::ZERO, 1),
        Err(Error::Configuration { .. })
    ));
    assert!(matches!(
        PrefetchWorkerExecutor::new(Duration::from_millis(10), 0),
        Err(Error::Configuration { .. })
    ));
}

#[test]
fn submit_after_shutdown_fails() {
    let executor = PrefetchWorkerExecutor::new(Duration::from_millis(10), 1).unwrap();
    executor.shutdown();
    assert!(executor.is_shutdown());

    let err = SegmentChainGenerator::with_clock(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        SegmentChainConfig::default(),
        MockClock::at(0),
        &executor,
    )
    .unwrap_err();
    assert_eq!(err, Error::SchedulerShutdown);
}

#[test]
fn executor_stocks_chain_in_background() {
    let executor = PrefetchWorkerExecutor::new(Duration::from_millis(10), 2).unwrap();
    let clock = MockClock::at(1_000);
    let generator = SegmentChainGenerator::with_clock(
        InMemorySegmentDistributor::new("orders", 100).unwrap(),
        SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, 5).unwrap(),
        Arc::clone(&clock),
        &executor,
    )
    .unwrap();

    assert!(wait_for(|| generator.distributor().max_id() >= 500));
    assert_eq!(generator.next_id().unwrap(), 0);
}

#[test]
fn hunger_wakes_the_bound_worker() {
    let executor = PrefetchWorkerExecutor::new(Duration::from_secs(3600), 1).unwrap();
    let clock = MockClock::at(1_000);
    let generator = SegmentChainGenerator::with_clock(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, 1).unwrap(),
        Arc::clone(&clock),
        &executor,
    )
    .unwrap();

    assert!(wait_for(|| generator.head().last().version() >= 0));
    let stocked = generator.distributor().max_id();

    generator.prefetch_job().hungry(clock.current_secs());
    assert!(wait_for(|| generator.distributor().max_id() > stocked));
    assert!(generator.prefetch_distance() >= 2);
}

#[test]
fn resubmitting_a_bound_job_is_a_no_op() {
    let executor = PrefetchWorkerExecutor::new(Duration::from_millis(10), 2).unwrap();
    let clock = MockClock::at(0);
    let generator = SegmentChainGenerator::with_clock(
        InMemorySegmentDistributor::new("orders", 10).unwrap(),
        SegmentChainConfig::default(),
        clock,
        &executor,
    )
    .unwrap();

    let job = Arc::clone(generator.prefetch_job());
    executor.submit(job).unwrap();
}
