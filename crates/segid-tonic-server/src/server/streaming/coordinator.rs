use super::processor::generate_chunk;
use segid_tonic_core::{Error, proto::IdChunk, types::Generator};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Streams `total_ids` IDs from `generator` to a client in chunks of at most
/// `ids_per_chunk`.
///
/// Each chunk is generated, then forwarded on `resp_tx`; the bounded channel
/// provides backpressure. Generation stops early when:
///
/// - the client goes away (`RequestCancelled`),
/// - `shutdown` is cancelled (`ServiceShutdown`, surfaced to the client),
/// - the generator fails (surfaced to the client).
pub async fn feed_chunks(
    generator: Arc<Generator>,
    total_ids: usize,
    ids_per_chunk: usize,
    resp_tx: mpsc::Sender<Result<IdChunk, Status>>,
    shutdown: CancellationToken,
) -> segid_tonic_core::Result<()> {
    let mut remaining = total_ids;
    let mut buf = Vec::with_capacity(ids_per_chunk.min(total_ids) * segid_tonic_core::types::ID_SIZE);

    while remaining > 0 {
        let chunk_size = remaining.min(ids_per_chunk);
        remaining -= chunk_size;

        if resp_tx.is_closed() {
            return Err(Error::RequestCancelled);
        }

        let chunk = tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(Error::ServiceShutdown),
            chunk = generate_chunk(&generator, chunk_size, &mut buf) => chunk,
        };

        match chunk {
            Ok(chunk) => {
                if resp_tx.send(Ok(chunk)).await.is_err() {
                    return Err(Error::RequestCancelled);
                }
            }
            Err(e) => {
                // Best effort: the client may already be gone.
                if let Err(_e) = resp_tx.send(Err(e.clone().into())).await {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to forward err: {}", _e);
                }
                return Err(e);
            }
        }
    }

    Ok(())
}
