//! Errors surfaced by [`DocumentStore`](crate::DocumentStore)
//! implementations.
//!
//! These never cross the RPC boundary as-is: the service maps each of them to
//! a status code before replying.

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All error variants a document store can emit.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The MongoDB driver failed (unreachable server, write error, cursor
    /// failure, decode failure).
    #[cfg(feature = "mongodb")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// A document could not be encoded to or decoded from BSON.
    #[error("Document codec error: {reason}")]
    Codec { reason: String },

    /// The backing store failed for a reason other than the document itself.
    /// Used by stores without a driver error type of their own.
    #[error("Store backend error: {reason}")]
    Backend { reason: String },

    /// The store reported an inserted identifier that is not an ObjectId.
    #[error("Inserted identifier is not an ObjectId: {found}")]
    UnexpectedId { found: String },

    /// A replace matched no document.
    #[error("No document matched identifier {id}")]
    NoMatch { id: String },
}
