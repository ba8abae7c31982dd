use alloc::{string::String, sync::Arc};

use crate::{
    distributor::SegmentDistributor,
    error::{Error, Result},
    store::SegmentStore,
};

/// A distributor that reserves blocks from a shared [`SegmentStore`].
#[derive(Debug)]
pub struct StoreSegmentDistributor<S> {
    namespace: String,
    step: i64,
    store: Arc<S>,
}

impl<S: SegmentStore> StoreSegmentDistributor<S> {
    /// # Errors
    ///
    /// [`Error::Configuration`] if `namespace` is empty or `step` is not
    /// positive.
    pub fn new(namespace: impl Into<String>, step: i64, store: Arc<S>) -> Result<Self> {
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
            store,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

impl<S: SegmentStore> SegmentDistributor for StoreSegmentDistributor<S> {
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
        self.store.increment_max_id(&self.namespace, step).await
    }
}
