/// Builds the gRPC client and server code for `proto/segid.proto` using
/// `tonic-prost-build`.
///
/// The `packed_ids` field of `IdChunk` is generated as `bytes::Bytes` rather
/// than `Vec<u8>`, so streamed chunks are handed to the transport without an
/// extra copy.
///
/// A file descriptor set is written next to the generated code so the server
/// can expose gRPC reflection:
///
/// ```rust
/// pub mod proto {
///     tonic::include_proto!("segid");
///     pub const FILE_DESCRIPTOR_SET: &[u8] =
///         tonic::include_file_descriptor_set!("segid_descriptor");
/// }
/// ```
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("segid_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    // Ensure packed binary field is treated as `Bytes`, not `Vec<u8>`
    config
        .bytes([".segid.IdChunk.packed_ids"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/segid.proto"], &["proto"])
        .unwrap();
}
