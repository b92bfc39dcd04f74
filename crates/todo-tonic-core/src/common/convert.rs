//! Translation between wire `Todo` messages and stored `TodoDocument`s.
//!
//! The stored identifier is the single source of truth for identity. The wire
//! identifier is always its hex rendering, and wire identifiers are parsed
//! back here before anything reaches the store.

use crate::{Error, Result, proto::Todo};
use todo_store::{TodoDocument, TodoId};

/// Parses a wire identifier into the store-native [`TodoId`].
///
/// # Errors
///
/// Returns [`Error::InvalidId`] unless `raw` is exactly 24 hex characters.
pub fn parse_todo_id(raw: &str) -> Result<TodoId> {
    TodoId::parse_str(raw).map_err(|e| Error::InvalidId {
        id: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Builds an unsaved document from a wire todo. The wire `id` is discarded.
pub fn todo_to_document(todo: Todo) -> TodoDocument {
    TodoDocument::new(todo.author_id, todo.title, todo.content)
}

/// Renders a stored document as a wire todo.
///
/// # Errors
///
/// Returns [`Error::MissingId`] if the document carries no identifier.
pub fn document_to_todo(document: TodoDocument) -> Result<Todo> {
    let id = document.id.ok_or(Error::MissingId)?;
    Ok(document_to_todo_with_id(document, id))
}

/// Renders a stored document as a wire todo whose identifier is `id`.
///
/// Whatever `_id` the document decoded with is ignored. This compensates for a
/// store decode that might drop `_id`; it is not how identity is decided, since
/// the document was already fetched by `id`.
pub fn document_to_todo_with_id(document: TodoDocument, id: TodoId) -> Todo {
    Todo {
        id: id.to_hex(),
        author_id: document.author_id,
        title: document.title,
        content: document.content,
    }
}
