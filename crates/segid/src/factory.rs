use alloc::{string::String, sync::Arc, vec::Vec};
use std::collections::HashMap;

use futures::lock::Mutex as AsyncMutex;

use crate::{
    distributor::StoreSegmentDistributor,
    error::Result,
    generator::{SegmentChainConfig, SegmentChainGenerator},
    mutex::{Mutex, lock},
    prefetch::PrefetchScheduler,
    segment::TIME_TO_LIVE_FOREVER,
    store::{SegmentDefinition, SegmentStore},
};

/// The generator type a [`SegmentIdFactory`] hands out.
pub type StoreSegmentGenerator<S> = SegmentChainGenerator<StoreSegmentDistributor<S>>;

/// Creates and caches one generator per namespace from the rows of a
/// [`SegmentStore`].
///
/// Each generator's step and safe distance come from its row. Generators are
/// created on first request and live as long as the factory. All of them
/// share the factory's scheduler.
pub struct SegmentIdFactory<S> {
    store: Arc<S>,
    scheduler: Arc<dyn PrefetchScheduler>,
    ttl: i64,
    generators: Mutex<HashMap<String, Arc<StoreSegmentGenerator<S>>>>,
    creating: AsyncMutex<()>,
}

impl<S> SegmentIdFactory<S>
where
    S: SegmentStore + 'static,
{
    /// Creates a factory whose generators never expire their segments.
    pub fn new(store: Arc<S>, scheduler: Arc<dyn PrefetchScheduler>) -> Self {
        Self {
            store,
            scheduler,
            ttl: TIME_TO_LIVE_FOREVER,
            generators: Mutex::new(HashMap::new()),
            creating: AsyncMutex::new(()),
        }
    }

    /// Sets the TTL, in seconds, of the segments generators fetch.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] if `ttl` is not positive.
    pub fn with_ttl(mut self, ttl: i64) -> Result<Self> {
        SegmentChainConfig::new(ttl, 1)?;
        self.ttl = ttl;
        Ok(self)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the generator for `namespace`, creating it on first use.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::NamespaceNotFound`] if the store has no row for
    ///   `namespace`.
    /// - [`crate::Error::Configuration`] if the row is invalid.
    /// - Any error from the store or from [`PrefetchScheduler::submit`].
    pub async fn id_generator(&self, namespace: &str) -> Result<Arc<StoreSegmentGenerator<S>>> {
        if let Some(generator) = self.cached(namespace)? {
            return Ok(generator);
        }
        let _creating = self.creating.lock().await;
        if let Some(generator) = self.cached(namespace)? {
            return Ok(generator);
        }

        let definition = self.store.definition(namespace).await?;
        let distributor =
            StoreSegmentDistributor::new(namespace, definition.step, Arc::clone(&self.store))?;
        let config = SegmentChainConfig::new(self.ttl, definition.safe_distance)?;
        let generator = Arc::new(SegmentChainGenerator::new(
            distributor,
            config,
            &*self.scheduler,
        )?);
        lock!(self.generators).insert(namespace.into(), Arc::clone(&generator));

        #[cfg(feature = "tracing")]
        tracing::info!(
            namespace,
            step = definition.step,
            safe_distance = definition.safe_distance,
            "created generator"
        );
        Ok(generator)
    }

    /// Blocking form of [`Self::id_generator`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::id_generator`].
    pub fn id_generator_blocking(&self, namespace: &str) -> Result<Arc<StoreSegmentGenerator<S>>> {
        futures::executor::block_on(self.id_generator(namespace))
    }

    /// Registers a new namespace. Returns `false` if it already exists.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] if `namespace` is empty or any other
    /// value is not positive, or any error from the store.
    pub async fn add_segment(
        &self,
        namespace: &str,
        max_id: i64,
        step: i64,
        safe_distance: i64,
    ) -> Result<bool> {
        let definition = SegmentDefinition::new(namespace, max_id, step, safe_distance)?;
        let created = self.store.add_segment(definition).await?;
        #[cfg(feature = "tracing")]
        tracing::info!(namespace, max_id, step, safe_distance, created, "add segment");
        Ok(created)
    }

    /// Namespaces with a cached generator, sorted.
    ///
    /// # Errors
    ///
    /// [`crate::Error::LockPoisoned`] if the cache lock is poisoned (std
    /// mutexes only).
    pub fn namespaces(&self) -> Result<Vec<String>> {
        let mut namespaces: Vec<_> = lock!(self.generators).keys().cloned().collect();
        namespaces.sort_unstable();
        Ok(namespaces)
    }

    /// Every cached generator, sorted by namespace.
    ///
    /// # Errors
    ///
    /// [`crate::Error::LockPoisoned`] if the cache lock is poisoned (std
    /// mutexes only).
    pub fn generators(&self) -> Result<Vec<Arc<StoreSegmentGenerator<S>>>> {
        let mut generators: Vec<_> = lock!(self.generators).values().cloned().collect();
        generators.sort_unstable_by(|a, b| a.namespace().cmp(b.namespace()));
        Ok(generators)
    }

    fn cached(&self, namespace: &str) -> Result<Option<Arc<StoreSegmentGenerator<S>>>> {
        Ok(lock!(self.generators).get(namespace).cloned())
    }
}

impl<S> core::fmt::Debug for SegmentIdFactory<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentIdFactory")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
