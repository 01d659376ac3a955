use std::sync::Arc;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider, llm::build_chat_client},
};
use retrieval_pipeline::{DefaultQueryServices, QueryServices, QuerySettings};
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub services: Arc<dyn QueryServices>,
    pub settings: QuerySettings,
    pub config: AppConfig,
}

impl ApiState {
    /// Opens the vector store and builds the model clients named in `config`.
    pub async fn new(config: &AppConfig) -> Result<Self, AppError> {
        let db = Arc::new(SurrealDbClient::from_config(config).await?);
        db.ensure_initialized().await?;

        let embedder = Arc::new(EmbeddingProvider::from_config(config).await?);
        info!(
            backend = embedder.backend_label(),
            dimension = embedder.dimension(),
            "Embedding provider initialized"
        );

        let services = DefaultQueryServices::new(
            db,
            embedder,
            Arc::new(build_chat_client(config)),
            config.chat_model.clone(),
        );

        Ok(Self::with_services(config, Arc::new(services)))
    }

    pub fn with_services(config: &AppConfig, services: Arc<dyn QueryServices>) -> Self {
        Self {
            services,
            settings: QuerySettings::from_app_config(config),
            config: config.clone(),
        }
    }
}
