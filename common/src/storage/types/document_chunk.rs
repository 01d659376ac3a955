#![allow(clippy::module_name_repetitions)]
use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Heuristic label of what a chunk of course text is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Definition,
    Advantages,
    Disadvantages,
    Steps,
    Algorithm,
    Comparison,
    Example,
    Explanation,
    Formula,
    #[default]
    General,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Definition => "definition",
            ChunkType::Advantages => "advantages",
            ChunkType::Disadvantages => "disadvantages",
            ChunkType::Steps => "steps",
            ChunkType::Algorithm => "algorithm",
            ChunkType::Comparison => "comparison",
            ChunkType::Example => "example",
            ChunkType::Explanation => "explanation",
            ChunkType::Formula => "formula",
            ChunkType::General => "general",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExamPriority {
    High,
    Medium,
    #[default]
    Low,
}

stored_object!(DocumentChunk, "document_chunk", {
    text: String,
    year: String,
    subject: String,
    doc_type: String,
    unit: String,
    topic: String,
    /// File name of the source PDF
    source: String,
    /// Full path of the source PDF; re-indexing replaces by this key
    source_path: String,
    page: u32,
    chunk_type: ChunkType,
    exam_priority: ExamPriority,
    embedding: Vec<f32>
});

/// Metadata restriction applied to a similarity search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkFilter {
    pub unit: Option<String>,
    pub doc_types: Option<Vec<String>>,
}

impl ChunkFilter {
    pub fn is_empty(&self) -> bool {
        self.unit.is_none() && self.doc_types.is_none()
    }
}

/// A search hit, without the stored embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMatch {
    pub text: String,
    pub source: String,
    pub unit: String,
    pub doc_type: String,
    pub chunk_type: ChunkType,
    pub page: u32,
    pub score: f32,
}

#[derive(Deserialize)]
struct CountRow {
    count: u64,
}

/// Deterministic record key for the `ordinal`-th chunk of `source_path`.
pub fn chunk_id(source_path: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_path.as_bytes());
    hasher.update(b"#");
    hasher.update(ordinal.to_string().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

impl DocumentChunk {
    pub async fn upsert_many(chunks: Vec<Self>, db: &SurrealDbClient) -> Result<usize, AppError> {
        let mut stored = 0usize;
        for chunk in chunks {
            if db.upsert_item(chunk).await?.is_some() {
                stored = stored.saturating_add(1);
            }
        }
        Ok(stored)
    }

    /// Deletes chunks of `source_path` whose id is not in `keep`; an empty
    /// `keep` clears the source.
    pub async fn delete_stale(
        source_path: &str,
        keep: Vec<String>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "DELETE type::table($table) WHERE source_path = $source_path AND record::id(id) NOT IN $keep",
            )
            .bind(("table", Self::table_name()))
            .bind(("source_path", source_path.to_owned()))
            .bind(("keep", keep))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn count(db: &SurrealDbClient) -> Result<u64, AppError> {
        let rows: Vec<CountRow> = db
            .client
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", Self::table_name()))
            .await?
            .take(0)?;
        Ok(rows.first().map_or(0, |row| row.count))
    }

    /// Cosine-ranked chunks for `embedding`, best first.
    pub async fn search(
        embedding: Vec<f32>,
        filter: &ChunkFilter,
        limit: usize,
        db: &SurrealDbClient,
    ) -> Result<Vec<ChunkMatch>, AppError> {
        let mut conditions = Vec::new();
        if filter.unit.is_some() {
            conditions.push("unit = $unit");
        }
        if filter.doc_types.is_some() {
            conditions.push("doc_type IN $doc_types");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let sql = format!(
            "SELECT text, source, unit, doc_type, chunk_type, page,
                    vector::similarity::cosine(embedding, $embedding) AS score
             FROM type::table($table)
             {where_clause}
             ORDER BY score DESC
             LIMIT $limit"
        );

        let mut query = db
            .client
            .query(sql)
            .bind(("table", Self::table_name()))
            .bind(("embedding", embedding))
            .bind(("limit", limit));
        if let Some(unit) = &filter.unit {
            query = query.bind(("unit", unit.clone()));
        }
        if let Some(doc_types) = &filter.doc_types {
            query = query.bind(("doc_types", doc_types.clone()));
        }

        let matches: Vec<ChunkMatch> = query.await?.take(0)?;
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn chunk(source_path: &str, ordinal: usize, unit: &str, doc_type: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: chunk_id(source_path, ordinal),
            indexed_at: Utc::now(),
            text: format!("chunk {ordinal} of {source_path}"),
            year: "2024".into(),
            subject: "python".into(),
            doc_type: doc_type.into(),
            unit: unit.into(),
            topic: "lists".into(),
            source: "lists.pdf".into(),
            source_path: source_path.into(),
            page: 1,
            chunk_type: ChunkType::General,
            exam_priority: ExamPriority::Low,
            embedding,
        }
    }

    async fn seeded_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("init");

        let chunks = vec![
            chunk("a.pdf", 0, "unit1", "notes", vec![1.0, 0.0, 0.0]),
            chunk("a.pdf", 1, "unit1", "pyq", vec![0.9, 0.1, 0.0]),
            chunk("b.pdf", 0, "unit2", "notes", vec![0.8, 0.2, 0.0]),
            chunk("c.pdf", 0, "unit1", "lab", vec![0.0, 1.0, 0.0]),
        ];
        DocumentChunk::upsert_many(chunks, &db).await.expect("upsert");
        db
    }

    #[test]
    fn chunk_ids_are_deterministic_and_distinct() {
        assert_eq!(chunk_id("a.pdf", 3), chunk_id("a.pdf", 3));
        assert_ne!(chunk_id("a.pdf", 3), chunk_id("a.pdf", 4));
        assert_ne!(chunk_id("a.pdf", 3), chunk_id("b.pdf", 3));
        assert_eq!(chunk_id("a.pdf", 0).len(), 64);
    }

    #[test]
    fn chunk_type_serializes_snake_case() {
        let json = serde_json::to_string(&ChunkType::Disadvantages).expect("serialize");
        assert_eq!(json, "\"disadvantages\"");
        assert_eq!(ChunkType::Formula.to_string(), "formula");
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let db = seeded_db().await;

        let results = DocumentChunk::search(vec![1.0, 0.0, 0.0], &ChunkFilter::default(), 10, &db)
            .await
            .expect("search");

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].text, "chunk 0 of a.pdf");
        assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn search_applies_unit_and_doc_type_filter() {
        let db = seeded_db().await;
        let filter = ChunkFilter {
            unit: Some("unit1".into()),
            doc_types: Some(vec!["notes".into(), "pyq".into()]),
        };

        let results = DocumentChunk::search(vec![0.0, 1.0, 0.0], &filter, 10, &db)
            .await
            .expect("search");

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|hit| hit.unit == "unit1"));
        assert!(results.iter().all(|hit| hit.doc_type != "lab"));
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let db = seeded_db().await;
        let results = DocumentChunk::search(vec![1.0, 0.0, 0.0], &ChunkFilter::default(), 2, &db)
            .await
            .expect("search");
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn delete_stale_keeps_listed_ids_of_the_source() {
        let db = seeded_db().await;
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 4);

        DocumentChunk::delete_stale("a.pdf", vec![chunk_id("a.pdf", 0)], &db)
            .await
            .expect("delete");
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 3);
        assert!(db
            .get_item::<DocumentChunk>(&chunk_id("a.pdf", 0))
            .await
            .expect("get")
            .is_some());
        assert!(db
            .get_item::<DocumentChunk>(&chunk_id("a.pdf", 1))
            .await
            .expect("get")
            .is_none());

        DocumentChunk::delete_stale("a.pdf", Vec::new(), &db)
            .await
            .expect("clear source");
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 2);

        DocumentChunk::delete_stale("missing.pdf", Vec::new(), &db)
            .await
            .expect("delete of unknown source");
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn count_of_empty_collection_is_zero() {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("db");
        db.ensure_initialized().await.expect("init");
        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn upserting_same_ids_replaces_records() {
        let db = seeded_db().await;
        let mut replacement = chunk("a.pdf", 0, "unit1", "notes", vec![1.0, 0.0, 0.0]);
        replacement.text = "rewritten".into();
        DocumentChunk::upsert_many(vec![replacement], &db)
            .await
            .expect("upsert");

        assert_eq!(DocumentChunk::count(&db).await.expect("count"), 4);
        let stored: Option<DocumentChunk> = db
            .get_item(&chunk_id("a.pdf", 0))
            .await
            .expect("fetch");
        assert_eq!(stored.map(|c| c.text), Some("rewritten".to_string()));
    }
}
