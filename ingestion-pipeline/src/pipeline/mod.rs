mod config;

pub use config::IngestionConfig;

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider, llm::LlmClient},
};
use tracing::{info, warn};

use crate::{
    chunking::{chunk_document, write_jsonl, ChunkRecord, ChunkedDocument},
    extraction::{
        discover_pdfs, discover_with_extension, extract_document, ExtractOutcome,
        PageTextSource, PdfPageExtractor,
    },
    indexer::Indexer,
};

/// Per-stage tally; failures are logged and counted, never fatal to the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Pages for extraction, chunks for chunking and indexing.
    pub items: usize,
}

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    config: IngestionConfig,
    source: Arc<dyn PageTextSource>,
    indexer: Indexer,
}

impl IngestionPipeline {
    /// Builds the PDF-backed pipeline; CLI overrides are already applied to `config`.
    pub fn with_config(
        config: IngestionConfig,
        app_config: &AppConfig,
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
        vision_client: Arc<LlmClient>,
    ) -> Self {
        let source = Arc::new(PdfPageExtractor::new(
            vision_client,
            app_config.ocr_model.clone(),
        ));
        Self::with_source(config, source, db, embedder)
    }

    pub fn with_source(
        config: IngestionConfig,
        source: Arc<dyn PageTextSource>,
        db: Arc<SurrealDbClient>,
        embedder: Arc<EmbeddingProvider>,
    ) -> Self {
        let indexer = Indexer::new(db, embedder).with_batch_size(config.index_batch_size);
        Self {
            config,
            source,
            indexer,
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(skip_all, fields(root = %self.config.documents_dir.display()))]
    pub async fn extract_all(&self) -> Result<StageReport, AppError> {
        let started = Instant::now();
        let mut report = StageReport::default();

        for pdf in discover_pdfs(&self.config.documents_dir) {
            match extract_document(&pdf, self.source.as_ref(), self.config.force_extract).await {
                Ok(ExtractOutcome::Skipped) => report.skipped = report.skipped.saturating_add(1),
                Ok(ExtractOutcome::Extracted { pages, .. }) => {
                    report.processed = report.processed.saturating_add(1);
                    report.items = report.items.saturating_add(pages);
                }
                Err(err) => {
                    warn!(pdf = %pdf.display(), error = %err, "extraction failed");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            pages = report.items,
            elapsed_ms = Self::duration_millis(started.elapsed()),
            "extraction finished"
        );
        Ok(report)
    }

    /// Chunks every `.txt` sidecar, grouped by the PDF it came from.
    ///
    /// Sidecars that no longer yield any chunk are still returned, empty, so
    /// indexing can clear what was stored for them before.
    #[tracing::instrument(skip_all, fields(root = %self.config.documents_dir.display()))]
    pub async fn chunk_all(&self) -> Result<(StageReport, Vec<ChunkedDocument>), AppError> {
        let started = Instant::now();
        let mut report = StageReport::default();
        let mut documents = Vec::new();

        for txt in self.sidecars() {
            match chunk_document(&txt).await {
                Ok(document) => {
                    if document.records.is_empty() {
                        report.skipped = report.skipped.saturating_add(1);
                    } else {
                        report.processed = report.processed.saturating_add(1);
                        report.items = report.items.saturating_add(document.records.len());
                    }
                    documents.push(document);
                }
                Err(err) => {
                    warn!(txt = %txt.display(), error = %err, "chunking failed");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        if let Some(export_path) = &self.config.export_path {
            let all: Vec<ChunkRecord> = documents
                .iter()
                .flat_map(|document| document.records.iter().cloned())
                .collect();
            write_jsonl(&all, export_path).await?;
            info!(path = %export_path.display(), chunks = all.len(), "exported chunks");
        }

        info!(
            documents = report.processed,
            chunks = report.items,
            failed = report.failed,
            elapsed_ms = Self::duration_millis(started.elapsed()),
            "chunking finished"
        );
        Ok((report, documents))
    }

    pub async fn index_all(&self) -> Result<StageReport, AppError> {
        let (_, documents) = self.chunk_all().await?;

        let started = Instant::now();
        let mut report = StageReport::default();

        for ChunkedDocument {
            source_path,
            records,
        } in documents
        {
            let cleared = records.is_empty();
            match self.indexer.index_source(&source_path, records).await {
                Ok(_) if cleared => {
                    info!(%source_path, "no chunks left, cleared source");
                    report.skipped = report.skipped.saturating_add(1);
                }
                Ok(stored) => {
                    report.processed = report.processed.saturating_add(1);
                    report.items = report.items.saturating_add(stored);
                }
                Err(err) => {
                    warn!(%source_path, error = %err, "indexing failed");
                    report.failed = report.failed.saturating_add(1);
                }
            }
        }

        info!(
            documents = report.processed,
            chunks = report.items,
            failed = report.failed,
            elapsed_ms = Self::duration_millis(started.elapsed()),
            "indexing finished"
        );
        Ok(report)
    }

    /// Extract, then chunk and index everything under the documents root.
    pub async fn run(&self) -> Result<(StageReport, StageReport), AppError> {
        let started = Instant::now();
        let extracted = self.extract_all().await?;
        let indexed = self.index_all().await?;
        info!(
            total_ms = Self::duration_millis(started.elapsed()),
            pdfs = extracted.processed,
            chunks = indexed.items,
            "ingestion finished"
        );
        Ok((extracted, indexed))
    }

    fn sidecars(&self) -> Vec<PathBuf> {
        discover_with_extension(&self.config.documents_dir, "txt")
    }
}
