use alloc::string::String;
use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    mutex::{Mutex, lock},
    store::{SegmentDefinition, SegmentStore},
};

/// A process-local [`SegmentStore`] behind a single mutex.
///
/// Useful for tests, benchmarks, and single-process deployments. Every call
/// is one critical section, which gives the increment-and-return atomicity a
/// real store provides with a row lock.
#[derive(Debug, Default)]
pub struct MemorySegmentStore {
    rows: Mutex<HashMap<String, SegmentDefinition>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store seeded with `definitions`. Later duplicates are ignored.
    pub fn with_definitions(definitions: impl IntoIterator<Item = SegmentDefinition>) -> Self {
        let mut rows = HashMap::new();
        for definition in definitions {
            rows.entry(definition.namespace.clone()).or_insert(definition);
        }
        Self {
            rows: Mutex::new(rows),
        }
    }

    fn read(&self, namespace: &str) -> Result<SegmentDefinition> {
        let rows = lock!(self.rows);
        rows.get(namespace)
            .cloned()
            .ok_or_else(|| Error::NamespaceNotFound {
                namespace: namespace.into(),
            })
    }

    fn increment(&self, namespace: &str, delta: i64) -> Result<i64> {
        let mut rows = lock!(self.rows);
        let row = rows
            .get_mut(namespace)
            .ok_or_else(|| Error::NamespaceNotFound {
                namespace: namespace.into(),
            })?;
        let next = row
            .max_id
            .checked_add(delta)
            .ok_or_else(|| Error::unavailable(namespace, "id space exhausted"))?;
        row.max_id = next;
        Ok(next)
    }

    fn insert(&self, definition: SegmentDefinition) -> Result<bool> {
        let mut rows = lock!(self.rows);
        if rows.contains_key(&definition.namespace) {
            return Ok(false);
        }
        rows.insert(definition.namespace.clone(), definition);
        Ok(true)
    }
}

impl SegmentStore for MemorySegmentStore {
    async fn definition(&self, namespace: &str) -> Result<SegmentDefinition> {
        self.read(namespace)
    }

    async fn increment_max_id(&self, namespace: &str, delta: i64) -> Result<i64> {
        self.increment(namespace, delta)
    }

    async fn add_segment(&self, definition: SegmentDefinition) -> Result<bool> {
        self.insert(definition)
    }
}
