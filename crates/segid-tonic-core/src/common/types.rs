//! # Wire encoding and server-side generator types
//!
//! IDs travel as raw little-endian `i64`s packed back to back in
//! [`IdChunk`](crate::proto::IdChunk) buffers. Both ends size their buffers
//! with [`ID_SIZE`].

use segid::{MemorySegmentStore, PrefetchWorkerExecutor, SegmentIdFactory, StoreSegmentGenerator};

/// The primitive integer type of every ID.
pub type IdTy = i64;

/// The number of bytes one ID occupies in a packed chunk.
pub const ID_SIZE: usize = core::mem::size_of::<IdTy>();

/// The store the server keeps its namespace rows in.
pub type Store = MemorySegmentStore;

/// Hands out one cached generator per namespace.
pub type Factory = SegmentIdFactory<Store>;

/// The generator a [`Factory`] returns.
pub type Generator = StoreSegmentGenerator<Store>;

/// Background scheduler keeping every generator's chain stocked.
pub type Scheduler = PrefetchWorkerExecutor;

/// Appends `id` to `buf` in wire format.
pub fn encode_id(buf: &mut Vec<u8>, id: IdTy) {
    buf.extend_from_slice(&id.to_le_bytes());
}

/// Decodes every complete ID in `packed`. A trailing partial ID is ignored.
pub fn decode_ids(packed: &[u8]) -> impl Iterator<Item = IdTy> + '_ {
    packed.chunks_exact(ID_SIZE).map(|bytes| {
        let mut raw = [0_u8; ID_SIZE];
        raw.copy_from_slice(bytes);
        IdTy::from_le_bytes(raw)
    })
}
