//! Server-side components of the segid gRPC service.
//!
//! - [`config`] - CLI/env configuration.
//! - [`service`] - gRPC service implementation and graceful shutdown.
//! - [`streaming`] - chunked ID streaming.
//! - [`telemetry`] - logging, tracing and metrics initialization.

pub mod config;
pub mod service;
pub mod streaming;
pub mod telemetry;
