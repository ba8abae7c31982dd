use crate::{
    error::{Error, Result},
    segment::TIME_TO_LIVE_FOREVER,
};

/// Number of blocks kept prefetched when nothing else is configured.
pub const DEFAULT_SAFE_DISTANCE: i64 = 10;

/// Validated construction parameters of a
/// [`SegmentChainGenerator`](crate::SegmentChainGenerator).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SegmentChainConfig {
    ttl: i64,
    safe_distance: i64,
}

impl SegmentChainConfig {
    /// # Errors
    ///
    /// [`Error::Configuration`] if `ttl` or `safe_distance` is not positive.
    pub fn new(ttl: i64, safe_distance: i64) -> Result<Self> {
        if ttl <= 0 {
            return Err(Error::config(format!("ttl {ttl} must be greater than 0")));
        }
        if safe_distance <= 0 {
            return Err(Error::config(format!(
                "safe_distance {safe_distance} must be greater than 0"
            )));
        }
        Ok(Self { ttl, safe_distance })
    }

    /// Seconds a fetched segment stays usable.
    pub const fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Minimum number of blocks to keep ahead of consumption.
    pub const fn safe_distance(&self) -> i64 {
        self.safe_distance
    }
}

impl Default for SegmentChainConfig {
    fn default() -> Self {
        Self {
            ttl: TIME_TO_LIVE_FOREVER,
            safe_distance: DEFAULT_SAFE_DISTANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_values() {
        assert!(SegmentChainConfig::new(0, 1).is_err());
        assert!(SegmentChainConfig::new(1, 0).is_err());
        assert!(SegmentChainConfig::new(-5, 10).is_err());
        let config = SegmentChainConfig::new(60, 4).unwrap();
        assert_eq!((config.ttl(), config.safe_distance()), (60, 4));
    }

    #[test]
    fn default_never_expires() {
        let config = SegmentChainConfig::default();
        assert_eq!(config.ttl(), TIME_TO_LIVE_FOREVER);
        assert_eq!(config.safe_distance(), DEFAULT_SAFE_DISTANCE);
    }
}
