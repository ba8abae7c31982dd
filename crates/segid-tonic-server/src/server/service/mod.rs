//! gRPC service implementation.
//!
//! - [`handler`] - gRPC service entry point (`SegmentIdService`), request
//!   validation, in-flight stream tracking and graceful shutdown.

pub mod handler;
