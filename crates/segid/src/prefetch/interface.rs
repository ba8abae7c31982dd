use alloc::sync::Arc;

use futures::future::BoxFuture;

use crate::error::Result;

/// Outcome of one [`AffinityJob::run`] pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Run the job again on the next period or wakeup.
    Continue,
    /// The job's owner is gone; the scheduler should drop it.
    Finished,
}

/// A handle that cuts the wait before a job's next run short.
pub trait PrefetchWaker: Send + Sync {
    fn wake(&self);
}

/// Periodic background work bound to a single worker for its whole life.
///
/// A job is bound at most once: the first [`AffinityJob::bind_waker`] wins and
/// later submissions of the same job are no-ops.
pub trait AffinityJob: Send + Sync {
    /// Stable identifier, used for logging and worker naming.
    fn job_id(&self) -> &str;

    /// Runs one pass of the job.
    fn run(&self) -> BoxFuture<'_, JobStatus>;

    /// Binds the waker of the worker this job now belongs to. Returns `false`
    /// if the job was already bound.
    fn bind_waker(&self, waker: Arc<dyn PrefetchWaker>) -> bool;
}

/// Runs [`AffinityJob`]s periodically in the background.
pub trait PrefetchScheduler: Send + Sync {
    /// Registers `job` and runs it once right away.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::SchedulerShutdown`] after [`Self::shutdown`].
    /// - [`crate::Error::Configuration`] if a worker cannot be started.
    fn submit(&self, job: Arc<dyn AffinityJob>) -> Result<()>;

    /// Stops all workers. Jobs are dropped; later submissions fail.
    fn shutdown(&self);
}
