use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::document_chunk::{ChunkFilter, ChunkMatch, DocumentChunk},
    },
    utils::{embedding::EmbeddingProvider, llm::LlmClient},
};
use tracing::debug;

use crate::{
    answer::{create_chat_request, process_llm_response},
    routing::QueryMode,
};

/// External collaborators of the query flow.
#[async_trait]
pub trait QueryServices: Send + Sync {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AppError>;

    async fn search(
        &self,
        embedding: Vec<f32>,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>, AppError>;

    async fn complete(&self, mode: QueryMode, user_message: String) -> Result<String, AppError>;

    async fn collection_size(&self) -> Result<u64, AppError>;

    fn model_name(&self) -> &str;
}

pub struct DefaultQueryServices {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    chat_client: Arc<LlmClient>,
    chat_model: String,
}

impl DefaultQueryServices {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        chat_client: Arc<LlmClient>,
        chat_model: String,
    ) -> Self {
        Self {
            db,
            embedder,
            chat_client,
            chat_model,
        }
    }
}

#[async_trait]
impl QueryServices for DefaultQueryServices {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AppError> {
        Ok(self.embedder.embed(query).await?)
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        filter: &ChunkFilter,
        limit: usize,
    ) -> Result<Vec<ChunkMatch>, AppError> {
        DocumentChunk::search(embedding, filter, limit, &self.db).await
    }

    async fn complete(&self, mode: QueryMode, user_message: String) -> Result<String, AppError> {
        let request = create_chat_request(&self.chat_model, mode, user_message)?;
        let response = self.chat_client.chat().create(request).await?;
        debug!(model = %self.chat_model, usage = ?response.usage, "chat completion received");
        process_llm_response(response)
    }

    async fn collection_size(&self) -> Result<u64, AppError> {
        DocumentChunk::count(&self.db).await
    }

    fn model_name(&self) -> &str {
        &self.chat_model
    }
}
