//! Error types for the ID generation service.
//!
//! [`Error`] covers every failure the service reports. `From<Error>` for
//! `tonic::Status` picks the status code clients see:
//!
//! - `InvalidRequest` → `INVALID_ARGUMENT`
//! - `IdGeneration` → `NOT_FOUND` for an unknown namespace, `INVALID_ARGUMENT`
//!   for a bad namespace definition, `UNAVAILABLE` when the store cannot
//!   reserve, `INTERNAL` otherwise
//! - `ServiceShutdown` → `UNAVAILABLE`
//! - `RequestCancelled` → `CANCELLED`
//! - `ChannelError` → `INTERNAL`

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the ID generation service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The segment generator or the store behind it failed.
    #[error("ID error: {0}")]
    IdGeneration(#[from] segid::Error),

    /// The client aborted the request.
    #[error("Request cancelled by client")]
    RequestCancelled,

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::IdGeneration(e) => match e {
                segid::Error::NamespaceNotFound { .. } => Status::not_found(e.to_string()),
                segid::Error::Configuration { .. } => Status::invalid_argument(e.to_string()),
                segid::Error::DistributorUnavailable { .. } | segid::Error::SchedulerShutdown => {
                    Status::unavailable(e.to_string())
                }
                _ => Status::internal(format!("ID generation error: {}", e)),
            },
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
        }
    }
}
