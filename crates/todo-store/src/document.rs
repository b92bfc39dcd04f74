use serde::{Deserialize, Serialize};

/// Store-native identifier of a todo document.
///
/// A 12-byte BSON ObjectId. Its text form is 24 lowercase hex characters and
/// `TodoId::parse_str(&id.to_hex()) == Ok(id)` always holds.
pub type TodoId = bson::oid::ObjectId;

/// A todo as persisted in the collection.
///
/// `id` is `None` only before insertion; the store assigns it exactly once and
/// never changes it afterwards. It is serialized as `_id` and omitted when
/// absent so the store generates one on insert.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TodoId>,
    pub author_id: String,
    pub title: String,
    pub content: String,
}

impl TodoDocument {
    /// Builds a document that has not been stored yet.
    pub fn new(
        author_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            author_id: author_id.into(),
            title: title.into(),
            content: content.into(),
        }
    }

    /// Returns the same document stamped with `id`.
    #[must_use]
    pub fn with_id(mut self, id: TodoId) -> Self {
        self.id = Some(id);
        self
    }
}
