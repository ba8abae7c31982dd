use alloc::{sync::Arc, vec::Vec};
use core::time::Duration;

use ::smol::{
    Task, Timer,
    channel::{self, Sender},
    future,
    stream::StreamExt,
};
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    error::{Error, Result},
    mutex::{Mutex, lock},
    prefetch::{AffinityJob, JobStatus, PrefetchScheduler, PrefetchWaker},
};

struct ChannelWaker(Sender<()>);

impl PrefetchWaker for ChannelWaker {
    fn wake(&self) {
        // A full channel already has a wakeup pending.
        let _ = self.0.try_send(());
    }
}

/// A [`PrefetchScheduler`] that runs each job as a task on
/// [`smol`](https://docs.rs/smol)'s global executor.
///
/// Each task waits for the next [`Timer::interval`] tick or a hunger
/// wakeup between runs. Dropping a [`Task`] cancels it, so shutting the
/// scheduler down (or dropping it) stops every job.
pub struct SmolPrefetchScheduler {
    period: Duration,
    tasks: Mutex<Vec<Task<()>>>,
    shutdown: AtomicBool,
}

impl SmolPrefetchScheduler {
    /// # Errors
    ///
    /// [`Error::Configuration`] if `period` is zero.
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::config("prefetch period must be greater than 0"));
        }
        Ok(Self {
            period,
            tasks: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn track(&self, task: Task<()>) -> Result<()> {
        let mut tasks = lock!(self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        lock!(self.tasks).clear();
        Ok(())
    }
}

impl PrefetchScheduler for SmolPrefetchScheduler {
    fn submit(&self, job: Arc<dyn AffinityJob>) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::SchedulerShutdown);
        }
        let (tx, rx) = channel::bounded(1);
        if !job.bind_waker(Arc::new(ChannelWaker(tx))) {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::info!(job = job.job_id(), "prefetch job bound to smol task");

        let period = self.period;
        let task = ::smol::spawn(async move {
            let mut ticks = Timer::interval(period);
            loop {
                if job.run().await == JobStatus::Finished {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(job = job.job_id(), "prefetch job finished");
                    break;
                }
                future::or(
                    async {
                        ticks.next().await;
                    },
                    async {
                        let _ = rx.recv().await;
                    },
                )
                .await;
            }
        });
        self.track(task)
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(_e) = self.cancel_all() {
            #[cfg(feature = "tracing")]
            tracing::warn!("failed to cancel prefetch tasks: {_e}");
        }
    }
}

impl Drop for SmolPrefetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        InMemorySegmentDistributor, SegmentChainConfig, SegmentChainGenerator,
        TIME_TO_LIVE_FOREVER,
    };
    use futures::future::try_join_all;
    use std::collections::HashSet;

    const TASKS: usize = 16;
    const IDS_PER_TASK: usize = 4096;

    #[test]
    fn stocks_chain_in_background() {
        smol::block_on(async {
            let scheduler = SmolPrefetchScheduler::new(Duration::from_millis(10)).unwrap();
            let generator = SegmentChainGenerator::new(
                InMemorySegmentDistributor::new("orders", 100).unwrap(),
                SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, 3).unwrap(),
                &scheduler,
            )
            .unwrap();

            let mut stocked = false;
            for _ in 0..500 {
                if generator.distributor().max_id() >= 300 {
                    stocked = true;
                    break;
                }
                Timer::after(Duration::from_millis(10)).await;
            }
            assert!(stocked);
            assert_eq!(generator.next_id_async().await.unwrap(), 0);
        });
    }

    #[test]
    fn generates_many_unique_ids() {
        smol::block_on(async {
            let scheduler = SmolPrefetchScheduler::new(Duration::from_millis(5)).unwrap();
            let generator = SegmentChainGenerator::new(
                InMemorySegmentDistributor::new("orders", 128).unwrap(),
                SegmentChainConfig::new(TIME_TO_LIVE_FOREVER, 2).unwrap(),
                &scheduler,
            )
            .unwrap();

            let tasks: Vec<Task<Result<Vec<i64>>>> = (0..TASKS)
                .map(|_| {
                    let generator = generator.clone();
                    smol::spawn(async move {
                        let mut ids = Vec::with_capacity(IDS_PER_TASK);
                        for _ in 0..IDS_PER_TASK {
                            ids.push(generator.next_id_async().await?);
                        }
                        Ok(ids)
                    })
                })
                .collect();

            let all_ids: Vec<_> = try_join_all(tasks).await.unwrap().into_iter().flatten().collect();
            assert_eq!(all_ids.len(), TASKS * IDS_PER_TASK);

            let mut seen = HashSet::with_capacity(all_ids.len());
            for id in &all_ids {
                assert!(seen.insert(id), "Duplicate ID found: {id}");
            }
        });
    }

    #[test]
    fn rejects_submissions_after_shutdown() {
        let scheduler = SmolPrefetchScheduler::new(Duration::from_millis(10)).unwrap();
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        let err = SegmentChainGenerator::new(
            InMemorySegmentDistributor::new("orders", 100).unwrap(),
            SegmentChainConfig::default(),
            &scheduler,
        )
        .unwrap_err();
        assert_eq!(err, Error::SchedulerShutdown);
    }
}
