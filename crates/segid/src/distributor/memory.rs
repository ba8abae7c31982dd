use alloc::string::String;

use portable_atomic::{AtomicI64, Ordering};

use crate::{
    distributor::SegmentDistributor,
    error::{Error, Result},
};

/// A distributor backed by a process-local atomic counter.
///
/// Reservations are unique within the process only. Intended for tests,
/// benchmarks, and deployments where one process owns the namespace.
#[derive(Debug)]
pub struct InMemorySegmentDistributor {
    namespace: String,
    step: i64,
    max_id: AtomicI64,
}

impl InMemorySegmentDistributor {
    /// Creates a distributor whose first reservation is `[0, step)`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `namespace` is empty or `step` is not
    /// positive.
    pub fn new(namespace: impl Into<String>, step: i64) -> Result<Self> {
        Self::with_max_id(namespace, step, 0)
    }

    /// Creates a distributor whose stored upper bound starts at `max_id`.
    ///
    /// # Errors
    ///
    /// Same as [`InMemorySegmentDistributor::new`].
    pub fn with_max_id(namespace: impl Into<String>, step: i64, max_id: i64) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if step <= 0 {
            return Err(Error::config(format!("step {step} must be greater than 0")));
        }
        Ok(Self {
            namespace,
            step,
            max_id: AtomicI64::new(max_id),
        })
    }

    /// The current stored upper bound.
    pub fn max_id(&self) -> i64 {
        self.max_id.load(Ordering::Acquire)
    }
}

impl SegmentDistributor for InMemorySegmentDistributor {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn step(&self) -> i64 {
        self.step
    }

    async fn next_max_id(&self, step: i64) -> Result<i64> {
        if step <= 0 {
            return Err(Error::config(format!("step {step} must be greater than 0")));
        }
        self.max_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_add(step)
            })
            .map(|previous| previous + step)
            .map_err(|_| Error::unavailable(&self.namespace, "id space exhausted"))
    }
}
