//! Error types for the todo service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the service can report. It implements `From<Error>` for `tonic::Status` so
//! handlers can use `?` and clients receive a status code plus a readable
//! message. Store-specific errors are folded into these variants and never
//! reach the wire as their own type.
//!
//! ## Status mapping
//! - `InvalidId`, `ReplaceRejected`: `INVALID_ARGUMENT`
//! - `NotFound`: `NOT_FOUND`
//! - `Store`, `MissingId`, `ChannelError`: `INTERNAL`
//! - `ServiceShutdown`: `UNAVAILABLE`

use todo_store::Error as StoreError;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the todo service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The wire identifier is not a 24-character hex ObjectId.
    #[error("Cannot parse ID {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    /// No stored todo has the requested identifier.
    #[error("Cannot find todo with ID {id}")]
    NotFound { id: String },

    /// The store refused to overwrite an existing todo.
    #[error("Cannot update todo {id}: {source}")]
    ReplaceRejected {
        id: String,
        #[source]
        source: StoreError,
    },

    /// Any other store failure: unreachable, write, cursor or decode error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A stored todo came back without a usable identifier.
    #[error("Stored todo has no identifier")]
    MissingId,

    /// Internal channel send/receive failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidId { .. } | Error::ReplaceRejected { .. } => {
                Status::invalid_argument(err.to_string())
            }
            Error::NotFound { .. } => Status::not_found(err.to_string()),
            Error::Store(StoreError::UnexpectedId { found }) => {
                Status::internal(format!("Cannot convert inserted ID to ObjectId: {found}"))
            }
            Error::Store(_) | Error::MissingId | Error::ChannelError { .. } => {
                Status::internal(format!("Internal error: {err}"))
            }
            Error::ServiceShutdown => Status::unavailable(err.to_string()),
        }
    }
}
