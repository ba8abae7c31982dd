/// A trait for time sources that return a coarse wall-clock reading.
///
/// Segments only need second precision: the reading stamps a segment's fetch
/// time and drives its expiry check, and the prefetch job uses it to detect
/// hunger. This abstraction allows a cached clock on the hot path, or a mocked
/// time source in tests.
///
/// # Example
///
/// ```
/// use segid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_secs(&self) -> i64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_secs(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in whole seconds since the UNIX epoch.
    fn current_secs(&self) -> i64;
}

impl<T: TimeSource + ?Sized> TimeSource for alloc::sync::Arc<T> {
    fn current_secs(&self) -> i64 {
        (**self).current_secs()
    }
}
