use core::future::Future;

use crate::{
    error::{Error, Result},
    segment::{IdSegment, SegmentChain},
};

/// Number of logical blocks a distributor reserves per round trip unless the
/// caller asks for more.
pub const DEFAULT_SEGMENTS: i64 = 1;

/// Reserves blocks of IDs for one namespace from a shared store.
///
/// Implementors provide [`SegmentDistributor::next_max_id`], the store's
/// atomic increment-and-return of the namespace's upper bound. The provided
/// methods turn that into [`IdSegment`]s and chain nodes.
///
/// Successive reservations from one distributor have strictly increasing
/// offsets because each starts where the previous upper bound ended.
pub trait SegmentDistributor: Send + Sync {
    /// Namespace the reservations are made against.
    fn namespace(&self) -> &str;

    /// Size of one logical block.
    fn step(&self) -> i64;

    /// Atomically adds `step` to the stored upper bound and returns the new
    /// value. The reserved block is `[returned - step, returned)`.
    ///
    /// # Errors
    ///
    /// [`Error::DistributorUnavailable`] or [`Error::NamespaceNotFound`] when
    /// the reservation cannot be made. Nothing is retried.
    fn next_max_id(&self, step: i64) -> impl Future<Output = Result<i64>> + Send;

    /// Reserves `segments` logical blocks in one round trip, stamped with
    /// `fetch_time` (seconds) and valid for `ttl` seconds.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `segments` or `ttl` is not positive, or
    ///   the total reservation overflows.
    /// - Any error from [`SegmentDistributor::next_max_id`].
    fn next_segment(
        &self,
        segments: i64,
        ttl: i64,
        fetch_time: i64,
    ) -> impl Future<Output = Result<IdSegment>> + Send {
        async move {
            if segments <= 0 {
                return Err(Error::config(format!(
                    "segments {segments} must be greater than 0"
                )));
            }
            if ttl <= 0 {
                return Err(Error::config(format!("ttl {ttl} must be greater than 0")));
            }
            let step = self.step().checked_mul(segments).ok_or_else(|| {
                Error::config(format!(
                    "{segments} segments of step {} overflow",
                    self.step()
                ))
            })?;
            let max_id = self.next_max_id(step).await?;
            #[cfg(feature = "tracing")]
            tracing::debug!(
                namespace = self.namespace(),
                max_id,
                step,
                segments,
                "reserved segment"
            );
            Ok(IdSegment::merged(max_id, step, segments, fetch_time, ttl))
        }
    }

    /// Reserves a block and wraps it in the chain node that follows the node
    /// of version `previous_version`.
    ///
    /// # Errors
    ///
    /// Same as [`SegmentDistributor::next_segment`].
    fn next_segment_chain(
        &self,
        previous_version: i64,
        segments: i64,
        ttl: i64,
        fetch_time: i64,
    ) -> impl Future<Output = Result<SegmentChain>> + Send {
        async move {
            let segment = self.next_segment(segments, ttl, fetch_time).await?;
            Ok(SegmentChain::with_version(previous_version + 1, segment))
        }
    }
}

impl<D: SegmentDistributor> SegmentDistributor for alloc::sync::Arc<D> {
    fn namespace(&self) -> &str {
        (**self).namespace()
    }

    fn step(&self) -> i64 {
        (**self).step()
    }

    fn next_max_id(&self, step: i64) -> impl Future<Output = Result<i64>> + Send {
        (**self).next_max_id(step)
    }
}
