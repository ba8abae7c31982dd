//! Chunked ID streaming.
//!
//! - [`coordinator`] - splits a request into chunks and forwards them to the
//!   client stream.
//! - [`processor`] - fills a single chunk from a generator.

pub mod coordinator;
pub mod processor;
