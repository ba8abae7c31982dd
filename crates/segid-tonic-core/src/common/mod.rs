//! Types shared by the segid gRPC server and its clients.
//!
//! - [`error`] - service error type and its mapping onto `tonic::Status`.
//! - [`types`] - ID wire encoding and the generator types the server runs.
//! - [`proto`] - generated protobuf messages and service stubs.

pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/segid.proto`.
///
/// `IdChunk::packed_ids` holds whole IDs only, each as a little-endian `i64`:
///
/// ```rust
/// use segid_tonic_core::types::{ID_SIZE, decode_ids};
///
/// let packed = [7_i64, 8].map(i64::to_le_bytes).concat();
/// assert_eq!(packed.len() % ID_SIZE, 0);
/// assert_eq!(decode_ids(&packed).collect::<Vec<_>>(), [7, 8]);
/// ```
pub mod proto {
    tonic::include_proto!("segid");
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("segid_descriptor");
}
