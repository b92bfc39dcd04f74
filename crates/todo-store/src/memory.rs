use crate::{DocumentStore, DocumentStream, Error, Result, TodoDocument, TodoId};
use bson::Document;
use futures::StreamExt;
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

/// An in-process [`DocumentStore`].
///
/// Documents are kept BSON-encoded, exactly as a document database would hold
/// them, so reads go through the same decode path as [`MongoStore`]. Clones
/// share the same collection.
///
/// Enumeration order is identifier order, which for freshly generated
/// ObjectIds follows insertion order.
///
/// [`MongoStore`]: crate::MongoStore
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    collection: Arc<RwLock<BTreeMap<TodoId, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently stored.
    pub fn len(&self) -> usize {
        self.collection.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.read().is_empty()
    }
}

fn encode(document: &TodoDocument) -> Result<Document> {
    bson::to_document(document).map_err(|e| Error::Codec {
        reason: e.to_string(),
    })
}

fn decode(raw: Document) -> Result<TodoDocument> {
    bson::from_document(raw).map_err(|e| Error::Codec {
        reason: e.to_string(),
    })
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, document: TodoDocument) -> Result<TodoId> {
        let id = TodoId::new();
        let raw = encode(&document.with_id(id))?;
        self.collection.write().insert(id, raw);
        Ok(id)
    }

    async fn find_one(&self, id: TodoId) -> Result<Option<TodoDocument>> {
        let raw = self.collection.read().get(&id).cloned();
        raw.map(decode).transpose()
    }

    async fn replace_one(&self, id: TodoId, document: TodoDocument) -> Result<()> {
        let raw = encode(&document.with_id(id))?;
        match self.collection.write().get_mut(&id) {
            Some(slot) => {
                *slot = raw;
                Ok(())
            }
            None => Err(Error::NoMatch { id: id.to_hex() }),
        }
    }

    async fn delete_one(&self, id: TodoId) -> Result<u64> {
        Ok(u64::from(self.collection.write().remove(&id).is_some()))
    }

    async fn find_all(&self) -> Result<DocumentStream> {
        // Snapshot so the cursor never holds the lock across an await.
        let snapshot: Vec<Document> = self.collection.read().values().cloned().collect();
        Ok(futures::stream::iter(snapshot).map(decode).boxed())
    }
}
