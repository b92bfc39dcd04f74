use crate::{DocumentStore, DocumentStream, Error, Result, TodoDocument, TodoId};
use bson::{Bson, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::{Client, Collection};

/// A [`DocumentStore`] backed by one MongoDB collection.
///
/// The driver's [`Client`] owns a connection pool and is safe to share, so a
/// single `MongoStore` serves every concurrent request. All operations address
/// documents by `_id` equality only.
#[derive(Clone, Debug)]
pub struct MongoStore {
    collection: Collection<TodoDocument>,
}

impl MongoStore {
    /// Connects to the deployment at `uri` and binds to
    /// `database.collection`.
    ///
    /// The driver connects lazily, so an unreachable server surfaces on the
    /// first operation rather than here.
    ///
    /// # Errors
    ///
    /// Returns an error if `uri` is not a valid connection string.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await?;
        Ok(Self::from_client(&client, database, collection))
    }

    pub fn from_client(client: &Client, database: &str, collection: &str) -> Self {
        Self {
            collection: client.database(database).collection(collection),
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, err))]
    async fn insert(&self, document: TodoDocument) -> Result<TodoId> {
        // Leave `_id` out so the driver assigns one.
        let document = TodoDocument { id: None, ..document };
        let inserted = self.collection.insert_one(document).await?;
        match inserted.inserted_id {
            Bson::ObjectId(id) => Ok(id),
            other => Err(Error::UnexpectedId {
                found: other.to_string(),
            }),
        }
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(todo_id = %id), err)
    )]
    async fn find_one(&self, id: TodoId) -> Result<Option<TodoDocument>> {
        Ok(self.collection.find_one(doc! { "_id": id }).await?)
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(todo_id = %id), err)
    )]
    async fn replace_one(&self, id: TodoId, document: TodoDocument) -> Result<()> {
        let replaced = self
            .collection
            .replace_one(doc! { "_id": id }, document.with_id(id))
            .await?;
        if replaced.matched_count == 0 {
            return Err(Error::NoMatch { id: id.to_hex() });
        }
        Ok(())
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(todo_id = %id), err)
    )]
    async fn delete_one(&self, id: TodoId) -> Result<u64> {
        let deleted = self.collection.delete_one(doc! { "_id": id }).await?;
        Ok(deleted.deleted_count)
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, err))]
    async fn find_all(&self) -> Result<DocumentStream> {
        let cursor = self.collection.find(doc! {}).await?;
        Ok(cursor.map_err(Error::from).boxed())
    }
}
