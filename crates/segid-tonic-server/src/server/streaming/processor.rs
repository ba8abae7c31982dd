use bytes::Bytes;
use segid_tonic_core::{
    Result,
    proto::IdChunk,
    segid::IdGenStatus,
    types::{Generator, encode_id},
};

/// Fills one [`IdChunk`] with `chunk_size` IDs from `generator`.
///
/// IDs are claimed on the lock-free path while the chain has stock. When it
/// runs dry the call awaits a synchronous extension, which also tells the
/// prefetch job to widen its distance.
///
/// `buf` is a reusable scratch buffer; it is left empty on return.
///
/// # Errors
///
/// [`segid_tonic_core::Error::IdGeneration`] if the chain cannot be extended.
/// IDs already written to `buf` are discarded.
pub async fn generate_chunk(
    generator: &Generator,
    chunk_size: usize,
    buf: &mut Vec<u8>,
) -> Result<IdChunk> {
    buf.clear();
    for _ in 0..chunk_size {
        let id = match generator.try_next_id() {
            IdGenStatus::Ready { id } => id,
            IdGenStatus::Exhausted { .. } => match generator.next_id_async().await {
                Ok(id) => id,
                Err(e) => {
                    buf.clear();
                    return Err(e.into());
                }
            },
        };
        encode_id(buf, id);
    }

    let packed_ids = Bytes::copy_from_slice(buf);
    buf.clear();
    Ok(IdChunk { packed_ids })
}
