use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{
    storage::db::SurrealDbClient,
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
        llm::build_vision_client,
    },
};
use ingestion_pipeline::{IngestionConfig, IngestionPipeline, StageReport};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the course-notes index from a tree of PDFs.
#[derive(Debug, Parser)]
#[command(name = "ingest")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: IngestOptions,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// OCR every PDF into `.txt`/`.json` sidecars
    Extract,
    /// Chunk the sidecars without touching the vector store
    Chunk,
    /// Chunk the sidecars and upsert them into the vector store
    Index,
    /// Extract, chunk and index in one pass
    Run,
}

#[derive(Debug, Clone, Args)]
struct IngestOptions {
    /// Root of the `<year>/<subject>/<type>/<unit>/<file>.pdf` tree
    #[arg(long, global = true)]
    documents_dir: Option<PathBuf>,

    /// Re-extract PDFs that already have a sidecar
    #[arg(long, global = true, action = clap::ArgAction::SetTrue, default_value_t = false)]
    force: bool,

    /// Also write all chunks to this JSONL file
    #[arg(long, global = true)]
    export: Option<PathBuf>,

    /// Chunks embedded per request
    #[arg(long, global = true)]
    batch_size: Option<usize>,
}

impl IngestOptions {
    fn apply(&self, app_config: &AppConfig) -> IngestionConfig {
        let mut config = IngestionConfig::from_app_config(app_config);
        if let Some(dir) = &self.documents_dir {
            config.documents_dir.clone_from(dir);
        }
        if let Some(batch_size) = self.batch_size {
            config.index_batch_size = batch_size.max(1);
        }
        config.force_extract = self.force;
        config.export_path.clone_from(&self.export);
        config
    }
}

fn log_report(stage: &str, report: StageReport) {
    info!(
        stage,
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        items = report.items,
        "stage complete"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let app_config = get_config().context("loading configuration")?;
    let config = cli.options.apply(&app_config);

    let db = Arc::new(
        SurrealDbClient::from_config(&app_config)
            .await
            .context("opening vector store")?,
    );
    db.ensure_initialized().await?;

    let embedder = Arc::new(EmbeddingProvider::from_config(&app_config).await?);
    info!(
        backend = embedder.backend_label(),
        dimension = embedder.dimension(),
        documents_dir = %config.documents_dir.display(),
        "Embedding provider initialized"
    );

    let pipeline = IngestionPipeline::with_config(
        config,
        &app_config,
        db,
        embedder,
        Arc::new(build_vision_client(&app_config)),
    );

    match cli.command {
        Command::Extract => log_report("extract", pipeline.extract_all().await?),
        Command::Chunk => log_report("chunk", pipeline.chunk_all().await?.0),
        Command::Index => log_report("index", pipeline.index_all().await?),
        Command::Run => {
            let (extracted, indexed) = pipeline.run().await?;
            log_report("extract", extracted);
            log_report("index", indexed);
        }
    }

    Ok(())
}
