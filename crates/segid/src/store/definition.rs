use alloc::string::String;

use crate::error::{Error, Result};

/// One persisted row per namespace: the upper bound of the last reserved
/// block, the reservation size, and how many blocks to keep prefetched.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentDefinition {
    pub namespace: String,
    pub max_id: i64,
    pub step: i64,
    pub safe_distance: i64,
}

impl SegmentDefinition {
    /// Builds a validated row.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `namespace` is empty or any of `max_id`,
    /// `step` and `safe_distance` is not positive.
    pub fn new(
        namespace: impl Into<String>,
        max_id: i64,
        step: i64,
        safe_distance: i64,
    ) -> Result<Self> {
        let namespace = namespace.into();
        if namespace.is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if max_id <= 0 {
            return Err(Error::config(format!("max_id {max_id} must be greater than 0")));
        }
        if step <= 0 {
            return Err(Error::config(format!("step {step} must be greater than 0")));
        }
        if safe_distance <= 0 {
            return Err(Error::config(format!(
                "safe_distance {safe_distance} must be greater than 0"
            )));
        }
        Ok(Self {
            namespace,
            max_id,
            step,
            safe_distance,
        })
    }
}
