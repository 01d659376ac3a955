use std::path::PathBuf;

use common::utils::config::AppConfig;

use crate::indexer::DEFAULT_BATCH_SIZE;

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub documents_dir: PathBuf,
    /// Re-extract PDFs whose `.txt` sidecar already exists.
    pub force_extract: bool,
    pub index_batch_size: usize,
    /// Also write every chunk to this JSONL file when chunking.
    pub export_path: Option<PathBuf>,
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            documents_dir: PathBuf::from(&config.documents_dir),
            ..Self::default()
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("./data"),
            force_extract: false,
            index_batch_size: DEFAULT_BATCH_SIZE,
            export_path: None,
        }
    }
}
