use alloc::{
    string::String,
    sync::{Arc, Weak},
};
use core::fmt;
use std::sync::OnceLock;

use futures::{future::BoxFuture, lock::Mutex};
use portable_atomic::{AtomicI64, Ordering};

use crate::{
    distributor::SegmentDistributor,
    generator::GeneratorInner,
    prefetch::{AffinityJob, JobStatus, PrefetchWaker},
    segment::SegmentChain,
    time::TimeSource,
};

/// Upper bound on how many blocks a hungry job will reserve in one go.
pub const MAX_PREFETCH_DISTANCE: i64 = 100_000_000;

/// A job counts as hungry if the generator had to fetch synchronously less
/// than this many seconds before the job runs.
pub const HUNGER_THRESHOLD: i64 = 1;

/// Background job that keeps a generator's chain stocked ahead of
/// consumption.
///
/// Each pass adapts the prefetch distance: it doubles while callers are
/// hungry and halves back toward the safe distance once they are not. The
/// distance always stays within `[safe_distance, MAX_PREFETCH_DISTANCE]`.
///
/// The job holds only a weak reference to its generator. Once the generator
/// is dropped the next pass reports [`JobStatus::Finished`].
pub struct PrefetchJob<D, T> {
    namespace: String,
    step: i64,
    safe_distance: i64,
    generator: Weak<GeneratorInner<D, T>>,
    prefetch_distance: AtomicI64,
    last_hunger_time: AtomicI64,
    tail: Mutex<Arc<SegmentChain>>,
    waker: OnceLock<Arc<dyn PrefetchWaker>>,
}

impl<D, T> PrefetchJob<D, T>
where
    D: SegmentDistributor,
    T: TimeSource + Send + Sync,
{
    pub(crate) fn new(generator: &Arc<GeneratorInner<D, T>>) -> Self {
        let safe_distance = generator.config().safe_distance();
        Self {
            namespace: generator.distributor().namespace().into(),
            step: generator.distributor().step(),
            safe_distance,
            generator: Arc::downgrade(generator),
            prefetch_distance: AtomicI64::new(safe_distance),
            last_hunger_time: AtomicI64::new(i64::MIN),
            tail: Mutex::new(generator.head()),
            waker: OnceLock::new(),
        }
    }

    /// The number of blocks the next hungry pass would reserve.
    pub fn prefetch_distance(&self) -> i64 {
        self.prefetch_distance.load(Ordering::Relaxed)
    }

    /// Records that a caller had to fetch synchronously at `now` and wakes the
    /// bound worker.
    pub fn hungry(&self, now: i64) {
        self.last_hunger_time.store(now, Ordering::Release);
        if let Some(waker) = self.waker.get() {
            waker.wake();
        }
    }

    /// Runs one prefetch pass.
    pub async fn prefetch(&self) -> JobStatus {
        let Some(generator) = self.generator.upgrade() else {
            #[cfg(feature = "tracing")]
            tracing::debug!(namespace = %self.namespace, "generator dropped, prefetch finished");
            return JobStatus::Finished;
        };

        let now = generator.now();
        let hunger =
            now.saturating_sub(self.last_hunger_time.load(Ordering::Acquire)) < HUNGER_THRESHOLD;
        let distance = self.adapt_distance(hunger);

        let mut tail = self.tail.lock().await;
        let last = tail.last();
        *tail = last;

        let head = generator.available_head(now, &tail);
        generator.forward(&head);

        let safe_gap = self.safe_distance - head.gap(&tail, self.step);
        if safe_gap <= 0 && !hunger {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                namespace = %self.namespace,
                head = head.version(),
                tail = tail.version(),
                "chain stocked, prefetch skipped"
            );
            return JobStatus::Continue;
        }

        let segments = if hunger { distance } else { safe_gap };
        #[cfg(feature = "tracing")]
        tracing::debug!(
            namespace = %self.namespace,
            head = head.version(),
            tail = tail.version(),
            segments,
            "append chain"
        );

        let extended = tail
            .ensure_append_next(|previous: &SegmentChain| {
                generator.generate_next(previous.version(), segments, now)
            })
            .await;
        match extended {
            Ok(node) => {
                let last = node.last();
                *tail = last;
            }
            Err(_e) if _e.is_stale() => {
                #[cfg(feature = "tracing")]
                tracing::warn!(namespace = %self.namespace, "gave up stale segment: {_e}");
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(namespace = %self.namespace, "prefetch failed: {_e}");
            }
        }
        JobStatus::Continue
    }

    fn adapt_distance(&self, hunger: bool) -> i64 {
        let previous = self.prefetch_distance.load(Ordering::Relaxed);
        let next = if hunger {
            previous.saturating_mul(2).min(MAX_PREFETCH_DISTANCE)
        } else {
            (previous / 2).max(self.safe_distance)
        };
        self.prefetch_distance.store(next, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        if next > previous {
            tracing::info!(namespace = %self.namespace, "hunger, prefetch distance expands {previous} -> {next}");
        } else if next < previous {
            tracing::info!(namespace = %self.namespace, "full, prefetch distance shrinks {previous} -> {next}");
        }
        next
    }
}

impl<D, T> AffinityJob for PrefetchJob<D, T>
where
    D: SegmentDistributor,
    T: TimeSource + Send + Sync,
{
    fn job_id(&self) -> &str {
        &self.namespace
    }

    fn run(&self) -> BoxFuture<'_, JobStatus> {
        Box::pin(self.prefetch())
    }

    fn bind_waker(&self, waker: Arc<dyn PrefetchWaker>) -> bool {
        self.waker.set(waker).is_ok()
    }
}

impl<D, T> fmt::Debug for PrefetchJob<D, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchJob")
            .field("namespace", &self.namespace)
            .field("safe_distance", &self.safe_distance)
            .field("prefetch_distance", &self.prefetch_distance.load(Ordering::Relaxed))
            .field("bound", &self.waker.get().is_some())
            .finish_non_exhaustive()
    }
}
