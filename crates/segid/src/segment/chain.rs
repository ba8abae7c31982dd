use alloc::sync::Arc;
use core::{cmp::Ordering, fmt, future::Future};
use std::sync::OnceLock;

use futures::lock::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result},
    segment::IdSegment,
};

/// Version of the root node of every chain.
pub const ROOT_VERSION: i64 = -1;

/// A node of the segment chain: one [`IdSegment`], its version, and a link to
/// the next node that can be set exactly once.
///
/// Nodes are never mutated except for that one-time link. The chain is
/// monotonically increasing in offset and version by construction; a node is
/// freed once nothing reachable from the generator's head refers to it.
///
/// Extending a node is the only serialization point of the generator. The
/// per-node lock is taken only while deciding `next`, and skipped entirely
/// once `next` is set.
pub struct SegmentChain {
    version: i64,
    segment: IdSegment,
    next: OnceLock<Arc<SegmentChain>>,
    append_lock: Mutex<()>,
}

impl SegmentChain {
    /// Creates the root node: version [`ROOT_VERSION`] holding the OVERFLOW
    /// sentinel segment.
    pub fn root() -> Self {
        Self::with_version(ROOT_VERSION, IdSegment::overflow())
    }

    /// Creates the node that follows `previous`.
    pub fn new(previous: &Self, segment: IdSegment) -> Self {
        Self::with_version(previous.version + 1, segment)
    }

    pub fn with_version(version: i64, segment: IdSegment) -> Self {
        Self {
            version,
            segment,
            next: OnceLock::new(),
            append_lock: Mutex::new(()),
        }
    }

    pub const fn version(&self) -> i64 {
        self.version
    }

    pub const fn segment(&self) -> &IdSegment {
        &self.segment
    }

    /// The successor, if one has been appended.
    pub fn next(&self) -> Option<&Arc<Self>> {
        self.next.get()
    }

    /// Walks forward to the current end of the chain.
    pub fn last(self: &Arc<Self>) -> Arc<Self> {
        let mut tail = Arc::clone(self);
        while let Some(next) = tail.next().cloned() {
            tail = next;
        }
        tail
    }

    /// Number of whole `step`-sized blocks between this node's cursor and the
    /// end of `end`. Never negative, even when this node's cursor already sits
    /// past the end of `end`.
    pub fn gap(&self, end: &Self, step: i64) -> i64 {
        if step <= 0 {
            return 0;
        }
        (end.segment.max_id().saturating_sub(self.segment.sequence()) / step).max(0)
    }

    /// Installs `next` as this node's successor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleSegment`] if `next` does not start strictly past
    /// this node's segment, or if a successor is already installed. The
    /// candidate is discarded in both cases.
    pub fn append_next(&self, next: Arc<Self>) -> Result<()> {
        let current_offset = self.segment.offset();
        let next_offset = next.segment.offset();
        if current_offset >= next_offset {
            return Err(Error::StaleSegment {
                current_offset,
                next_offset,
            });
        }
        self.next.set(next).map_err(|existing| Error::StaleSegment {
            current_offset: self.next().map_or(current_offset, |n| n.segment.offset()),
            next_offset: existing.segment.offset(),
        })
    }

    /// Attempts to extend the chain from this node.
    ///
    /// Returns `Ok(false)` immediately if `next` is already set. Otherwise
    /// enters this node's critical section, re-checks, and only then calls
    /// `generate` and installs its result. Exactly one caller per node ever
    /// returns `Ok(true)`; losers find `next` set once they get the lock and
    /// never call `generate`.
    ///
    /// # Errors
    ///
    /// - Any error from `generate` (the chain is left unchanged).
    /// - [`Error::StaleSegment`] if the generated node does not advance past
    ///   this one.
    pub async fn try_append_next<F, Fut>(&self, generate: F) -> Result<bool>
    where
        F: FnOnce(&Self) -> Fut,
        Fut: Future<Output = Result<Self>>,
    {
        if self.next.get().is_some() {
            return Ok(false);
        }
        let _guard = self.append_lock.lock().await;
        if self.next.get().is_some() {
            return Ok(false);
        }
        let next = generate(self).await?;
        self.append_next(Arc::new(next))?;
        Ok(true)
    }

    /// Extends the chain from wherever it currently ends, starting at this
    /// node.
    ///
    /// Calls [`Self::try_append_next`] on this node; whenever another caller
    /// already extended it, retries on that successor instead. Concurrent
    /// callers racing on one node collapse onto a single `generate` call.
    ///
    /// Returns the node that was extended.
    ///
    /// # Errors
    ///
    /// Any error from [`Self::try_append_next`]; the attempt is abandoned.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip_all, fields(version = self.version)))]
    pub async fn ensure_append_next<F, Fut>(self: &Arc<Self>, mut generate: F) -> Result<Arc<Self>>
    where
        F: FnMut(&Self) -> Fut,
        Fut: Future<Output = Result<Self>>,
    {
        let mut current = Arc::clone(self);
        loop {
            if current.try_append_next(&mut generate).await? {
                return Ok(current);
            }
            if let Some(next) = current.next().cloned() {
                current = next;
            }
        }
    }
}

impl Drop for SegmentChain {
    fn drop(&mut self) {
        // Unlink iteratively so dropping a long unreachable chain cannot
        // overflow the stack.
        let mut next = self.next.take();
        while let Some(node) = next {
            next = match Arc::try_unwrap(node) {
                Ok(mut node) => node.next.take(),
                Err(_) => None,
            };
        }
    }
}

impl PartialEq for SegmentChain {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SegmentChain {}

impl PartialOrd for SegmentChain {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SegmentChain {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segment
            .offset()
            .cmp(&other.segment.offset())
            .then(self.version.cmp(&other.version))
    }
}

impl fmt::Debug for SegmentChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentChain")
            .field("version", &self.version)
            .field("segment", &self.segment)
            .field("has_next", &self.next.get().is_some())
            .finish()
    }
}
