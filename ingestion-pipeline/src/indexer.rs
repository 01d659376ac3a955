use std::sync::Arc;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::document_chunk::{chunk_id, DocumentChunk},
    },
    utils::embedding::EmbeddingProvider,
};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{debug, info};

use crate::chunking::ChunkRecord;

pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Embeds chunk records and upserts them into the chunk collection.
pub struct Indexer {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>) -> Self {
        Self {
            db,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Replaces every chunk previously indexed for `source_path` with `records`.
    ///
    /// All embeddings are computed before the store is touched, so a failing
    /// embedding backend leaves the previous chunks in place.
    pub async fn index_source(
        &self,
        source_path: &str,
        records: Vec<ChunkRecord>,
    ) -> Result<usize, AppError> {
        let mut chunks: Vec<DocumentChunk> = Vec::with_capacity(records.len());

        for batch in records.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|record| record.text.clone()).collect();

            let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
            let embeddings = Retry::spawn(retry_strategy, || self.embedder.embed_batch(texts.clone())).await?;

            if embeddings.len() != batch.len() {
                return Err(AppError::InternalError(format!(
                    "embedding backend returned {} vectors for {} chunks",
                    embeddings.len(),
                    batch.len()
                )));
            }

            let now = Utc::now();
            for (record, embedding) in batch.iter().zip(embeddings) {
                let ordinal = chunks.len();
                chunks.push(DocumentChunk {
                    id: chunk_id(source_path, ordinal),
                    indexed_at: now,
                    text: record.text.clone(),
                    year: record.metadata.year.clone(),
                    subject: record.metadata.subject.clone(),
                    doc_type: record.metadata.doc_type.clone(),
                    unit: record.metadata.unit.clone(),
                    topic: record.metadata.topic.clone(),
                    source: record.metadata.source.clone(),
                    source_path: source_path.to_string(),
                    page: record.page,
                    chunk_type: record.chunk_type,
                    exam_priority: record.exam_priority,
                    embedding,
                });
            }
            debug!(source_path, embedded = chunks.len(), "embedded batch");
        }

        // Ids are positional, so upserting overwrites in place and only the
        // tail beyond the new chunk count goes stale.
        let keep: Vec<String> = chunks.iter().map(|chunk| chunk.id.clone()).collect();
        let stored = DocumentChunk::upsert_many(chunks, &self.db).await?;
        DocumentChunk::delete_stale(source_path, keep, &self.db).await?;

        info!(source_path, chunks = stored, backend = self.embedder.backend_label(), "indexed source");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::infer_metadata;
    use async_openai::{config::OpenAIConfig, Client};
    use std::time::Duration;
    use common::storage::types::document_chunk::{ChunkFilter, ChunkType, ExamPriority};
    use std::path::Path;
    use uuid::Uuid;

    fn record(text: &str) -> ChunkRecord {
        ChunkRecord {
            text: text.to_string(),
            metadata: infer_metadata(Path::new("year_2/python/notes/unit3/Sets.pdf")),
            source_path: "year_2/python/notes/unit3/Sets.pdf".into(),
            page: 1,
            chunk_type: ChunkType::General,
            exam_priority: ExamPriority::Low,
        }
    }

    async fn indexer() -> (Indexer, Arc<SurrealDbClient>) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("db"),
        );
        db.ensure_initialized().await.expect("init");
        let embedder = Arc::new(EmbeddingProvider::new_hashed(256).expect("embedder"));
        (Indexer::new(Arc::clone(&db), embedder).with_batch_size(2), db)
    }

    #[tokio::test]
    async fn indexes_all_records_across_batches() {
        let (indexer, db) = indexer().await;
        let records = vec![
            record("sets hold unique elements"),
            record("set union and intersection"),
            record("frozenset is immutable"),
        ];

        let stored = indexer
            .index_source("year_2/python/notes/unit3/Sets.pdf", records)
            .await
            .expect("index");
        assert_eq!(stored, 3);
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 3);

        let filter = ChunkFilter {
            unit: Some("unit3".into()),
            doc_types: None,
        };
        let embedder = EmbeddingProvider::new_hashed(256).expect("embedder");
        let query = embedder.embed("frozenset immutable").await.expect("embed");
        let hits = DocumentChunk::search(query, &filter, 1, &db).await.expect("search");
        assert_eq!(hits.first().map(|hit| hit.text.as_str()), Some("frozenset is immutable"));
        assert_eq!(hits.first().map(|hit| hit.source.as_str()), Some("Sets.pdf"));
    }

    #[tokio::test]
    async fn reindexing_replaces_previous_chunks() {
        let (indexer, db) = indexer().await;
        let source = "year_2/python/notes/unit3/Sets.pdf";

        indexer
            .index_source(source, vec![record("a"), record("b"), record("c")])
            .await
            .expect("first index");
        indexer
            .index_source(source, vec![record("only one now")])
            .await
            .expect("second index");

        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 1);

        indexer
            .index_source(source, Vec::new())
            .await
            .expect("empty index");
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn failed_embedding_keeps_previous_chunks() {
        let (indexer, db) = indexer().await;
        let source = "year_2/python/notes/unit3/Sets.pdf";
        indexer
            .index_source(source, vec![record("a"), record("b")])
            .await
            .expect("first index");

        // Nothing listens on the discard port, so every embedding call fails.
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("http://127.0.0.1:9/v1"),
        );
        let unreachable = Arc::new(EmbeddingProvider::new_openai(
            Arc::new(client),
            "mxbai-embed-large".into(),
            256,
        ));
        let failing = Indexer::new(Arc::clone(&db), unreachable);

        let outcome = tokio::time::timeout(
            Duration::from_secs(30),
            failing.index_source(source, vec![record("replacement")]),
        )
        .await;
        assert!(!matches!(outcome, Ok(Ok(_))));

        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 2);
        let kept = db
            .get_item::<DocumentChunk>(&chunk_id(source, 1))
            .await
            .expect("get");
        assert_eq!(kept.map(|chunk| chunk.text), Some("b".to_string()));
    }
}
