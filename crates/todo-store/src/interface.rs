use crate::{Result, TodoDocument, TodoId};
use futures::stream::BoxStream;

/// Lazy, finite, single-pass sequence of stored documents.
///
/// Each poll advances the underlying cursor by one step. Dropping the stream
/// closes the cursor.
pub type DocumentStream = BoxStream<'static, Result<TodoDocument>>;

/// The capability surface the todo service needs from a document store.
///
/// Implementations are shared by every in-flight request and must be safe for
/// concurrent use (`Send + Sync`). No caching, indexing or querying beyond
/// identifier equality and a full scan is expected.
///
/// Every method returns a future that performs at most one store round trip;
/// dropping it abandons the operation.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Inserts `document` and returns the identifier the store assigned.
    ///
    /// Any `id` already set on `document` is ignored.
    async fn insert(&self, document: TodoDocument) -> Result<TodoId>;

    /// Fetches the document whose identifier equals `id`.
    async fn find_one(&self, id: TodoId) -> Result<Option<TodoDocument>>;

    /// Overwrites the document stored under `id` wholesale.
    ///
    /// The stored identifier is kept; the `id` field of `document` is not
    /// used to address the write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMatch`](crate::Error::NoMatch) when no document has
    /// that identifier.
    async fn replace_one(&self, id: TodoId, document: TodoDocument) -> Result<()>;

    /// Removes the document stored under `id` and returns how many documents
    /// were removed (`0` or `1`).
    async fn delete_one(&self, id: TodoId) -> Result<u64>;

    /// Opens a cursor over the whole collection in store-native order.
    ///
    /// Fails here only if the enumeration cannot be started; failures while
    /// iterating are yielded as items.
    async fn find_all(&self) -> Result<DocumentStream>;
}
