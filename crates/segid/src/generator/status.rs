use alloc::sync::Arc;

use crate::segment::SegmentChain;

/// Represents the result of a non-suspending attempt to generate an ID.
///
/// This type models the outcome of
/// [`SegmentChainGenerator::try_next_id`](crate::SegmentChainGenerator::try_next_id):
///
/// - [`IdGenStatus::Ready`] indicates a new ID was claimed.
/// - [`IdGenStatus::Exhausted`] means every reachable segment is used up or
///   expired, and the chain must be extended from `tail` before trying again.
///
/// # Example
///
/// ```
/// use segid::{
///     IdGenStatus, InMemorySegmentDistributor, SegmentChainConfig, SegmentChainGenerator,
/// };
///
/// struct FixedTime;
/// impl segid::TimeSource for FixedTime {
///     fn current_secs(&self) -> i64 {
///         1
///     }
/// }
///
/// let distributor = InMemorySegmentDistributor::new("orders", 100).unwrap();
/// let generator =
///     SegmentChainGenerator::from_components(distributor, SegmentChainConfig::default(), FixedTime);
/// match generator.try_next_id() {
///     IdGenStatus::Ready { id } => println!("ID: {id}"),
///     IdGenStatus::Exhausted { tail } => println!("extend after version {}", tail.version()),
/// }
/// ```
#[derive(Clone, Debug)]
pub enum IdGenStatus {
    /// A unique ID was claimed and is ready to use.
    Ready {
        /// The generated ID.
        id: i64,
    },
    /// No reachable segment can hand out an ID.
    Exhausted {
        /// The last node of the chain, the one that must be extended.
        tail: Arc<SegmentChain>,
    },
}
