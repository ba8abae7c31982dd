//! gRPC service implementation for segment-chain ID generation.
//!
//! This module defines [`SegmentIdService`], the concrete implementation of
//! the [`SegmentIdGenerator`] gRPC service. It owns the namespace factory and
//! the prefetch executor behind it.
//!
//! ## Responsibilities
//!
//! - Seed the configured namespaces into the store.
//! - Validate requests and enforce limits.
//! - Hand single IDs out directly and stream large batches via
//!   [`feed_chunks`].
//! - Track in-flight streams and shut down gracefully.

use crate::server::{
    config::ServerConfig,
    streaming::coordinator::feed_chunks,
    telemetry::{
        Rpc, generator_stats, observe_generators, record_error, record_ids_issued,
        record_request, record_stream_closed, record_stream_duration, record_stream_opened,
    },
};
use core::{pin::Pin, time::Duration};
use futures::TryStreamExt;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use segid_tonic_core::{
    Error,
    proto::{
        AddSegmentRequest, AddSegmentResponse, IdChunk, NextIdRequest, NextIdResponse,
        StreamIdsRequest, segment_id_generator_server::SegmentIdGenerator,
    },
    segid::PrefetchScheduler,
    types::{Factory, Generator, ID_SIZE, Scheduler, Store},
};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

struct ServiceState {
    factory: Arc<Factory>,
    scheduler: Arc<Scheduler>,
    refusing: AtomicBool,
    streams_inflight: AtomicUsize,
    shutdown_token: CancellationToken,
}

/// Decrements the in-flight stream count when a stream ends, however it ends.
struct InflightGuard {
    state: Arc<ServiceState>,
}

impl InflightGuard {
    fn new(state: &Arc<ServiceState>) -> Self {
        state.streams_inflight.fetch_add(1, Ordering::AcqRel);
        record_stream_opened();
        Self {
            state: Arc::clone(state),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.state.streams_inflight.fetch_sub(1, Ordering::AcqRel);
        record_stream_closed();
    }
}

/// gRPC service handing out segment-chain IDs per namespace.
///
/// Generators are created lazily, one per namespace, and shared by every
/// request for that namespace. A single [`Scheduler`] keeps all of their
/// chains stocked in the background.
#[derive(Clone)]
pub struct SegmentIdService {
    config: ServerConfig,
    state: Arc<ServiceState>,
}

impl SegmentIdService {
    /// Creates the service and registers every namespace in
    /// `config.segments`. Namespaces that already exist are left as is.
    ///
    /// # Errors
    ///
    /// [`Error::IdGeneration`] if the prefetch executor cannot be built or a
    /// seed row is invalid.
    pub async fn new(config: ServerConfig) -> Result<Self, Error> {
        let scheduler = Arc::new(Scheduler::new(
            config.prefetch_period,
            config.prefetch_workers,
        )?);
        let factory = Arc::new(
            Factory::new(
                Arc::new(Store::new()),
                Arc::clone(&scheduler) as Arc<dyn PrefetchScheduler>,
            )
            .with_ttl(config.segment_ttl)?,
        );
        observe_generators(Arc::downgrade(&factory));

        for seed in &config.segments {
            let _created = factory
                .add_segment(&seed.namespace, seed.max_id, seed.step, seed.safe_distance)
                .await?;
            #[cfg(feature = "tracing")]
            tracing::info!(namespace = %seed.namespace, created = _created, "seeded namespace");
        }

        Ok(Self {
            config,
            state: Arc::new(ServiceState {
                factory,
                scheduler,
                refusing: AtomicBool::new(false),
                streams_inflight: AtomicUsize::new(0),
                shutdown_token: CancellationToken::new(),
            }),
        })
    }

    pub fn streams_inflight(&self) -> usize {
        self.state.streams_inflight.load(Ordering::Acquire)
    }

    fn ensure_serving(&self) -> Result<(), Error> {
        if self.state.refusing.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        Ok(())
    }

    async fn generator(&self, namespace: &str) -> Result<Arc<Generator>, Error> {
        if namespace.is_empty() {
            return Err(Error::InvalidRequest {
                reason: "Namespace must not be empty".to_string(),
            });
        }
        Ok(self.state.factory.id_generator(namespace).await?)
    }

    /// Shuts the service down in phases:
    ///
    /// 0. Refuse new requests.
    /// 1. Wait up to `shutdown_timeout` for in-flight streams to drain.
    /// 2. Cancel the streams that are left.
    /// 3. Stop the prefetch executor.
    pub async fn shutdown(&self) -> Result<(), Error> {
        // === Phase 0: Stop accepting new requests ===
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new requests");
        self.state.refusing.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight streams to drain ===
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        let drain_result = timeout(self.config.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        match drain_result {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("All in-flight streams drained successfully");
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Graceful drain timed out ({} streams still active)",
                    self.streams_inflight()
                );
            }
        }

        // === Phase 2: Cancel any remaining work ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling remaining streams via shutdown token");
        self.state.shutdown_token.cancel();

        for _stats in generator_stats(&self.state.factory) {
            #[cfg(feature = "tracing")]
            tracing::info!(
                namespace = %_stats.namespace,
                head_version = _stats.head_version,
                prefetch_distance = _stats.prefetch_distance,
                sync_extensions = _stats.sync_extensions,
                "generator state at shutdown"
            );
        }

        // === Phase 3: Stop the prefetch workers ===
        // Joining OS threads blocks, so keep it off the runtime's workers.
        let scheduler = Arc::clone(&self.state.scheduler);
        tokio::task::spawn_blocking(move || scheduler.shutdown())
            .await
            .map_err(|e| Error::ChannelError {
                context: format!("prefetch shutdown task failed: {e}"),
            })?;

        #[cfg(feature = "tracing")]
        tracing::info!("Prefetch executor shutdown complete");
        Ok(())
    }
}

/// Records a failed request and converts the error for the client.
fn rejected(rpc: Rpc, namespace: &str, error: Error) -> Status {
    let status = Status::from(error);
    record_error(rpc, namespace, status.code());
    status
}

#[tonic::async_trait]
impl SegmentIdGenerator for SegmentIdService {
    type StreamIdsStream = Pin<Box<dyn Stream<Item = Result<IdChunk, Status>> + Send>>;

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(namespace = %req.get_ref().namespace)))]
    async fn next_id(
        &self,
        req: Request<NextIdRequest>,
    ) -> Result<Response<NextIdResponse>, Status> {
        let namespace = &req.get_ref().namespace;
        let result = async {
            self.ensure_serving()?;
            let generator = self.generator(namespace).await?;
            Ok::<_, Error>(generator.next_id_async().await?)
        }
        .await;

        match result {
            Ok(id) => {
                record_request(Rpc::NextId, namespace);
                record_ids_issued(namespace, 1);
                Ok(Response::new(NextIdResponse { id }))
            }
            Err(e) => Err(rejected(Rpc::NextId, namespace, e)),
        }
    }

    /// Handles a streaming request for IDs.
    ///
    /// Validates the requested count, resolves the namespace's generator, then
    /// streams binary-packed chunks (`IdChunk`) back to the client from a
    /// spawned task.
    ///
    /// Requests, issued IDs and failures are recorded per namespace.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(namespace = %req.get_ref().namespace, count = req.get_ref().count)))]
    async fn stream_ids(
        &self,
        req: Request<StreamIdsRequest>,
    ) -> Result<Response<Self::StreamIdsStream>, Status> {
        let start = std::time::Instant::now();
        let StreamIdsRequest { namespace, count } = req.into_inner();

        if let Err(e) = self.ensure_serving() {
            return Err(rejected(Rpc::StreamIds, &namespace, e));
        }

        let total_ids = match usize::try_from(count) {
            Ok(0) => {
                let e = Error::InvalidRequest {
                    reason: "Count must be greater than 0".to_string(),
                };
                return Err(rejected(Rpc::StreamIds, &namespace, e));
            }
            Ok(total_ids) if total_ids <= self.config.max_allowed_ids => total_ids,
            _ => {
                let e = Error::InvalidRequest {
                    reason: format!(
                        "Count {} exceeds maximum allowed ({})",
                        count, self.config.max_allowed_ids
                    ),
                };
                return Err(rejected(Rpc::StreamIds, &namespace, e));
            }
        };

        let generator = match self.generator(&namespace).await {
            Ok(generator) => generator,
            Err(e) => return Err(rejected(Rpc::StreamIds, &namespace, e)),
        };

        record_request(Rpc::StreamIds, &namespace);
        let inflight = InflightGuard::new(&self.state);

        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<IdChunk, Status>>(self.config.stream_buffer_size);

        let ids_per_chunk = self.config.ids_per_chunk;
        let shutdown = self.state.shutdown_token.clone();

        let stream_namespace = namespace.clone();
        let fut = async move {
            let _inflight = inflight;
            match feed_chunks(generator, total_ids, ids_per_chunk, resp_tx, shutdown).await {
                Ok(()) => {
                    record_stream_duration(&stream_namespace, start.elapsed());
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Error: {}", _e);
                }
            }
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            let span = tracing::info_span!("streaming");
            fut.instrument(span)
        };

        tokio::spawn(fut);

        let issued_namespace = namespace.clone();
        let stream = ReceiverStream::new(resp_rx)
            .inspect_ok(move |chunk| {
                // packed_ids holds raw little-endian IDs.
                record_ids_issued(&issued_namespace, (chunk.packed_ids.len() / ID_SIZE) as u64);
            })
            .inspect_err(move |status| {
                record_error(Rpc::StreamIds, &namespace, status.code());
            });

        Ok(Response::new(Box::pin(stream)))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(namespace = %req.get_ref().namespace)))]
    async fn add_segment(
        &self,
        req: Request<AddSegmentRequest>,
    ) -> Result<Response<AddSegmentResponse>, Status> {
        let AddSegmentRequest {
            namespace,
            max_id,
            step,
            safe_distance,
        } = req.into_inner();

        let result = async {
            self.ensure_serving()?;
            Ok::<_, Error>(
                self.state
                    .factory
                    .add_segment(&namespace, max_id, step, safe_distance)
                    .await?,
            )
        }
        .await;

        match result {
            Ok(created) => {
                record_request(Rpc::AddSegment, &namespace);
                Ok(Response::new(AddSegmentResponse { created }))
            }
            Err(e) => Err(rejected(Rpc::AddSegment, &namespace, e)),
        }
    }
}
