use crate::{error::AppError, utils::config::AppConfig};

use super::types::{document_chunk::DocumentChunk, StoredObject};
use std::ops::Deref;
use surrealdb::{
    engine::any::{connect, Any},
    Error, Surreal,
};
use tracing::debug;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects to the store at `address` and selects the namespace/database pair.
    ///
    /// `address` is anything `engine::any` understands: `surrealkv://<dir>` for
    /// the embedded on-disk store, `mem://` for throwaway runs.
    pub async fn new(address: &str, namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Opens the collection named in the config.
    pub async fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let address = config.store_address();
        debug!(%address, collection = %config.collection_name, "opening vector store");
        Self::new(
            &address,
            &config.surrealdb_namespace,
            &config.collection_name,
        )
        .await
    }

    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        self.build_indexes().await?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        let query = format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;
             DEFINE INDEX IF NOT EXISTS idx_chunk_unit ON TABLE {table} FIELDS unit;
             DEFINE INDEX IF NOT EXISTS idx_chunk_doc_type ON TABLE {table} FIELDS doc_type;
             DEFINE INDEX IF NOT EXISTS idx_chunk_source_path ON TABLE {table} FIELDS source_path;",
            table = DocumentChunk::table_name(),
        );
        self.client.query(query).await?.check()?;
        Ok(())
    }

    /// Stores `item` under its id, replacing any record already there.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        let id = item.get_id().to_owned();
        self.client
            .upsert((T::table_name(), id))
            .content(item)
            .await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        Self::new("mem://", namespace, database).await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}
