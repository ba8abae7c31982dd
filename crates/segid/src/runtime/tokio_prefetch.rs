use alloc::{sync::Arc, vec::Vec};
use core::time::Duration;

use ::tokio::{
    runtime::Handle,
    sync::Notify,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use portable_atomic::{AtomicBool, Ordering};

use crate::{
    error::{Error, Result},
    mutex::{Mutex, lock},
    prefetch::{AffinityJob, JobStatus, PrefetchScheduler, PrefetchWaker},
};

struct NotifyWaker(Arc<Notify>);

impl PrefetchWaker for NotifyWaker {
    fn wake(&self) {
        self.0.notify_one();
    }
}

/// A [`PrefetchScheduler`] that runs each job as its own task on a
/// [`tokio`](https://docs.rs/tokio) runtime.
///
/// Each task runs its job, then waits for the next tick of a
/// [`time::interval`] or a hunger notification, whichever comes first. Tasks
/// are aborted on [`PrefetchScheduler::shutdown`] or when the scheduler is
/// dropped.
///
/// A job's run awaits the distributor directly on the runtime, so a
/// distributor that blocks will stall a runtime worker. Prefer
/// [`PrefetchWorkerExecutor`](crate::PrefetchWorkerExecutor) for blocking
/// stores.
pub struct TokioPrefetchScheduler {
    handle: Handle,
    period: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl TokioPrefetchScheduler {
    /// Creates a scheduler on the runtime of the calling context.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if called outside a tokio runtime or if
    /// `period` is zero.
    pub fn new(period: Duration) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::config(format!("no tokio runtime available: {e}")))?;
        Self::with_handle(handle, period)
    }

    /// # Errors
    ///
    /// [`Error::Configuration`] if `period` is zero.
    pub fn with_handle(handle: Handle, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::config("prefetch period must be greater than 0"));
        }
        Ok(Self {
            handle,
            period,
            tasks: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Number of job tasks still running.
    ///
    /// # Errors
    ///
    /// [`Error::LockPoisoned`] if the task list lock is poisoned (std mutexes
    /// only).
    pub fn active_tasks(&self) -> Result<usize> {
        Ok(lock!(self.tasks).iter().filter(|task| !task.is_finished()).count())
    }

    fn track(&self, task: JoinHandle<()>) -> Result<()> {
        let mut tasks = lock!(self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
        Ok(())
    }

    fn abort_all(&self) -> Result<()> {
        for task in lock!(self.tasks).drain(..) {
            task.abort();
        }
        Ok(())
    }
}

impl PrefetchScheduler for TokioPrefetchScheduler {
    fn submit(&self, job: Arc<dyn AffinityJob>) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::SchedulerShutdown);
        }
        let notify = Arc::new(Notify::new());
        if !job.bind_waker(Arc::new(NotifyWaker(Arc::clone(&notify)))) {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::info!(job = job.job_id(), "prefetch job bound to tokio task");

        let period = self.period;
        let task = self.handle.spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.reset();
            loop {
                if job.run().await == JobStatus::Finished {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(job = job.job_id(), "prefetch job finished");
                    break;
                }
                ::tokio::select! {
                    _ = interval.tick() => {}
                    () = notify.notified() => {}
                }
            }
        });
        self.track(task)
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(_e) = self.abort_all() {
            #[cfg(feature = "tracing")]
            tracing::warn!("failed to abort prefetch tasks: {_e}");
        }
    }
}

impl Drop for TokioPrefetchScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
