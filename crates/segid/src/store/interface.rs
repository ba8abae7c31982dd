use core::future::Future;

use crate::{error::Result, store::SegmentDefinition};

/// The shared, namespace-keyed record of reserved blocks.
///
/// Implementations must make [`SegmentStore::increment_max_id`] a single
/// atomic increment-and-return: two callers never observe the same upper
/// bound for one namespace. That is the only coordination between
/// generator instances.
pub trait SegmentStore: Send + Sync {
    /// Reads the row for `namespace`.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NamespaceNotFound`] if no row exists.
    fn definition(&self, namespace: &str) -> impl Future<Output = Result<SegmentDefinition>> + Send;

    /// Adds `delta` to the stored upper bound and returns the new value.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NamespaceNotFound`] if no row exists, or
    /// [`crate::Error::DistributorUnavailable`] if the store cannot complete
    /// the reservation.
    fn increment_max_id(&self, namespace: &str, delta: i64)
    -> impl Future<Output = Result<i64>> + Send;

    /// Inserts a new row. Returns `false` if the namespace already exists, in
    /// which case the stored row is left as is.
    fn add_segment(&self, definition: SegmentDefinition) -> impl Future<Output = Result<bool>> + Send;
}
