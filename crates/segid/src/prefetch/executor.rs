use alloc::{
    sync::{Arc, Weak},
    vec::Vec,
};
use core::time::Duration;
use std::{
    sync::OnceLock,
    thread::{self, JoinHandle, Thread},
};

use futures::executor::block_on;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::{
    error::{Error, Result},
    mutex::{Mutex, lock},
    prefetch::{AffinityJob, JobStatus, PrefetchScheduler, PrefetchWaker},
};

/// Default time between two runs of a worker's jobs.
pub const DEFAULT_PREFETCH_PERIOD: Duration = Duration::from_secs(1);

static SHARED: OnceLock<PrefetchWorkerExecutor> = OnceLock::new();

struct WorkerShared {
    jobs: Mutex<Vec<Arc<dyn AffinityJob>>>,
    woken: AtomicBool,
    shutdown: AtomicBool,
    thread: OnceLock<Thread>,
}

impl WorkerShared {
    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    fn snapshot(&self) -> Result<Vec<Arc<dyn AffinityJob>>> {
        Ok(lock!(self.jobs).clone())
    }

    fn remove(&self, finished: &[Arc<dyn AffinityJob>]) -> Result<()> {
        lock!(self.jobs).retain(|job| !finished.iter().any(|done| Arc::ptr_eq(job, done)));
        Ok(())
    }

    fn push(&self, job: Arc<dyn AffinityJob>) -> Result<()> {
        lock!(self.jobs).push(job);
        Ok(())
    }
}

struct WorkerWaker {
    shared: Weak<WorkerShared>,
}

impl PrefetchWaker for WorkerWaker {
    fn wake(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.wake();
        }
    }
}

struct Worker {
    name: String,
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn new(index: usize) -> Self {
        Self {
            name: format!("segid-prefetch-{index}"),
            shared: Arc::new(WorkerShared {
                jobs: Mutex::new(Vec::new()),
                woken: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                thread: OnceLock::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Starts the worker thread on first use.
    fn ensure_started(&self, period: Duration) -> Result<()> {
        let mut handle = lock!(self.handle);
        if handle.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run_worker(&shared, period))
            .map_err(|e| Error::config(format!("cannot start {}: {e}", self.name)))?;
        let _ = self.shared.thread.set(spawned.thread().clone());
        *handle = Some(spawned);
        #[cfg(feature = "tracing")]
        tracing::debug!(worker = %self.name, "prefetch worker started");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake();
        let handle = lock!(self.handle).take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        lock!(self.shared.jobs).clear();
        Ok(())
    }
}

fn run_worker(shared: &WorkerShared, period: Duration) {
    while !shared.shutdown.load(Ordering::Acquire) {
        let jobs = match shared.snapshot() {
            Ok(jobs) => jobs,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("prefetch worker stopping: {_e}");
                break;
            }
        };

        let mut finished = Vec::new();
        for job in jobs {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            if block_on(job.run()) == JobStatus::Finished {
                #[cfg(feature = "tracing")]
                tracing::debug!(job = job.job_id(), "prefetch job finished");
                finished.push(job);
            }
        }
        if !finished.is_empty() && shared.remove(&finished).is_err() {
            break;
        }

        if !shared.woken.swap(false, Ordering::AcqRel) {
            thread::park_timeout(period);
            shared.woken.store(false, Ordering::Release);
        }
    }
    #[cfg(feature = "tracing")]
    tracing::debug!("prefetch worker stopped");
}

/// A fixed pool of OS threads running prefetch jobs.
///
/// Each submitted job is bound to one worker, chosen round-robin, for its
/// whole life. A worker runs all of its jobs, then parks until the period
/// elapses or one of its jobs' generators reports hunger. Worker threads are
/// started lazily when their first job arrives and are named
/// `segid-prefetch-N`.
///
/// Dropping the executor shuts it down.
pub struct PrefetchWorkerExecutor {
    period: Duration,
    workers: Vec<Worker>,
    next_worker: AtomicUsize,
    shutdown: AtomicBool,
    submit_lock: Mutex<()>,
}

impl PrefetchWorkerExecutor {
    /// # Errors
    ///
    /// [`Error::Configuration`] if `period` is zero or `workers` is zero.
    pub fn new(period: Duration, workers: usize) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::config("prefetch period must be greater than 0"));
        }
        if workers == 0 {
            return Err(Error::config("prefetch workers must be greater than 0"));
        }
        Ok(Self::build(period, workers))
    }

    fn build(period: Duration, workers: usize) -> Self {
        Self {
            period,
            workers: (0..workers).map(Worker::new).collect(),
            next_worker: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            submit_lock: Mutex::new(()),
        }
    }

    /// The process-wide executor with default settings.
    pub fn shared() -> &'static Self {
        SHARED.get_or_init(Self::default)
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn choose_worker(&self) -> &Worker {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[index]
    }
}

impl Default for PrefetchWorkerExecutor {
    /// One worker per CPU, running every [`DEFAULT_PREFETCH_PERIOD`].
    fn default() -> Self {
        Self::build(DEFAULT_PREFETCH_PERIOD, num_cpus::get().max(1))
    }
}

impl PrefetchScheduler for PrefetchWorkerExecutor {
    fn submit(&self, job: Arc<dyn AffinityJob>) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!(job = job.job_id(), "submit prefetch job");
        if self.is_shutdown() {
            return Err(Error::SchedulerShutdown);
        }

        let _guard = lock!(self.submit_lock);
        if self.is_shutdown() {
            return Err(Error::SchedulerShutdown);
        }
        let worker = self.choose_worker();
        worker.ensure_started(self.period)?;
        let waker = Arc::new(WorkerWaker {
            shared: Arc::downgrade(&worker.shared),
        });
        if !job.bind_waker(waker) {
            return Ok(());
        }
        #[cfg(feature = "tracing")]
        tracing::info!(job = job.job_id(), worker = %worker.name, "prefetch job bound");
        worker.shared.push(job)?;
        worker.shared.wake();
        Ok(())
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            if let Err(_e) = worker.stop() {
                #[cfg(feature = "tracing")]
                tracing::warn!(worker = %worker.name, "failed to stop prefetch worker: {_e}");
            }
        }
    }
}

impl Drop for PrefetchWorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for PrefetchWorkerExecutor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PrefetchWorkerExecutor")
            .field("period", &self.period)
            .field("workers", &self.workers.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
