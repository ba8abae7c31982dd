use alloc::string::String;

/// A result type defaulting to the crate's [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants that `segid` can emit.
///
/// Only [`Error::DistributorUnavailable`] and [`Error::NamespaceNotFound`] can
/// reach a caller of `next_id`. [`Error::StaleSegment`] is recovered inside the
/// generator and the prefetch job; it is public because chain extension is
/// public API.
#[derive(Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A chain-extension candidate does not start strictly past its
    /// predecessor.
    ///
    /// This happens when a concurrent distributor call returned a block that
    /// was already superseded. The candidate is discarded and the extension
    /// attempt is abandoned.
    #[error("stale segment: next offset {next_offset} does not exceed current offset {current_offset}")]
    StaleSegment {
        current_offset: i64,
        next_offset: i64,
    },

    /// The shared store could not be reached or the reservation failed.
    ///
    /// No retry happens inside the generator; the in-memory chain is left
    /// untouched.
    #[error("distributor for `{namespace}` unavailable: {reason}")]
    DistributorUnavailable { namespace: String, reason: String },

    /// The store holds no row for the requested namespace.
    #[error("namespace `{namespace}` not found")]
    NamespaceNotFound { namespace: String },

    /// Invalid construction parameters.
    #[error("invalid configuration: {reason}")]
    Configuration { reason: String },

    /// A job was submitted to a scheduler that has been shut down.
    #[error("prefetch scheduler is shut down")]
    SchedulerShutdown,

    /// The operation failed because a lock was **poisoned**.
    ///
    /// This occurs when a thread panics while holding the lock. When the
    /// `parking-lot` feature is enabled, mutexes do **not** poison, so this
    /// variant is not available.
    #[cfg_attr(docsrs, doc(cfg(not(feature = "parking-lot"))))]
    #[cfg(not(feature = "parking-lot"))]
    #[error("lock poisoned")]
    LockPoisoned,
}

impl Error {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(namespace: &str, reason: impl Into<String>) -> Self {
        Self::DistributorUnavailable {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error is recovered locally by abandoning a single
    /// extension attempt.
    pub const fn is_stale(&self) -> bool {
        matches!(self, Self::StaleSegment { .. })
    }
}

#[cfg(not(feature = "parking-lot"))]
use crate::mutex::{MutexGuard, PoisonError};
#[cfg(not(feature = "parking-lot"))]
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
