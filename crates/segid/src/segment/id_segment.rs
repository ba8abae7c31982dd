use core::fmt;

use portable_atomic::{AtomicI64, Ordering};

/// Value returned by [`IdSegment::increment_and_get`] once a segment has no
/// more IDs to hand out.
pub const OVERFLOW_SENTINEL: i64 = -1;

/// TTL meaning "never expires".
pub const TIME_TO_LIVE_FOREVER: i64 = i64::MAX;

/// One reserved block of IDs plus a cursor into it.
///
/// The reservation (`max_id`, `step`, `fetch_time`, `ttl`) is immutable; only
/// the cursor moves. IDs are issued from the half-open range
/// `[offset, max_id)` where `offset = max_id - step`.
///
/// A segment may stand for several logical blocks reserved in one round trip;
/// [`IdSegment::segments`] reports how many, and [`IdSegment::step`] the size
/// of the whole reservation.
///
/// ## Features
/// - ✅ Lock-free: the cursor is a single atomic fetch-and-add
/// - ✅ Linearizable per segment
///
/// ## Caveats
/// A caller that loses the race at the boundary burns the slot it incremented
/// past `max_id`. The slot is never reused, so a handful of IDs per segment
/// may go unissued under contention. Nothing is ever issued twice.
pub struct IdSegment {
    max_id: i64,
    step: i64,
    offset: i64,
    segments: i64,
    fetch_time: i64,
    ttl: i64,
    #[cfg(feature = "cache-padded")]
    sequence: crossbeam_utils::CachePadded<AtomicI64>,
    #[cfg(not(feature = "cache-padded"))]
    sequence: AtomicI64,
}

impl IdSegment {
    /// Creates a segment covering `[max_id - step, max_id)`, fetched at
    /// `fetch_time` (seconds) and valid for `ttl` seconds.
    pub fn new(max_id: i64, step: i64, fetch_time: i64, ttl: i64) -> Self {
        Self::merged(max_id, step, 1, fetch_time, ttl)
    }

    /// Creates a segment that stands for `segments` logical blocks reserved in
    /// a single round trip. `step` is the size of the whole reservation.
    pub fn merged(max_id: i64, step: i64, segments: i64, fetch_time: i64, ttl: i64) -> Self {
        let offset = max_id - step;
        Self {
            max_id,
            step,
            offset,
            segments,
            fetch_time,
            ttl,
            #[cfg(feature = "cache-padded")]
            sequence: crossbeam_utils::CachePadded::new(AtomicI64::new(offset)),
            #[cfg(not(feature = "cache-padded"))]
            sequence: AtomicI64::new(offset),
        }
    }

    /// The OVERFLOW sentinel: never usable, seeds the root of every chain.
    pub fn overflow() -> Self {
        Self::new(OVERFLOW_SENTINEL, 0, 0, TIME_TO_LIVE_FOREVER)
    }

    /// Exclusive upper bound of the reserved block.
    pub const fn max_id(&self) -> i64 {
        self.max_id
    }

    /// Size of the reservation.
    pub const fn step(&self) -> i64 {
        self.step
    }

    /// Inclusive lower bound of the reserved block.
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Number of logical blocks this reservation stands for.
    pub const fn segments(&self) -> i64 {
        self.segments
    }

    pub const fn fetch_time(&self) -> i64 {
        self.fetch_time
    }

    pub const fn ttl(&self) -> i64 {
        self.ttl
    }

    /// The next ID this segment would hand out.
    pub fn sequence(&self) -> i64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Returns `true` once the cursor has reached `max_id`.
    pub fn is_overflow(&self) -> bool {
        self.sequence() >= self.max_id
    }

    /// Returns `true` if `candidate` is not an ID inside this block.
    pub const fn is_overflow_id(&self, candidate: i64) -> bool {
        candidate == OVERFLOW_SENTINEL || candidate >= self.max_id
    }

    /// Returns `true` if the TTL has elapsed as of `now` (seconds).
    pub const fn is_expired(&self, now: i64) -> bool {
        self.ttl != TIME_TO_LIVE_FOREVER && now.saturating_sub(self.fetch_time) > self.ttl
    }

    /// Returns `true` if this segment may still hand out IDs as of `now`.
    pub fn is_available(&self, now: i64) -> bool {
        !self.is_expired(now) && !self.is_overflow()
    }

    /// Claims the next ID in the block.
    ///
    /// Returns [`OVERFLOW_SENTINEL`] once the cursor has reached `max_id`.
    /// The cursor never moves past `max_id`, so it cannot wrap even when the
    /// block ends at `i64::MAX`.
    #[inline]
    pub fn increment_and_get(&self) -> i64 {
        let max_id = self.max_id;
        match self
            .sequence
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current >= max_id {
                    return None;
                }
                current.checked_add(1)
            }) {
            Ok(candidate) if !self.is_overflow_id(candidate) => candidate,
            _ => OVERFLOW_SENTINEL,
        }
    }
}

impl fmt::Debug for IdSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdSegment")
            .field("offset", &self.offset)
            .field("max_id", &self.max_id)
            .field("sequence", &self.sequence())
            .field("segments", &self.segments)
            .field("fetch_time", &self.fetch_time)
            .field("ttl", &self.ttl)
            .finish()
    }
}
