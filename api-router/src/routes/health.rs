use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use tracing::warn;

use crate::api_state::ApiState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub chroma_path: String,
}

/// Reports `healthy` only when the chunk collection is reachable and non-empty.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let status = match state.services.collection_size().await {
        Ok(0) => "unhealthy: collection is empty".to_string(),
        Ok(_) => "healthy".to_string(),
        Err(e) => {
            warn!(error = %e, "health check failed");
            format!("unhealthy: {e}")
        }
    };

    Json(HealthResponse {
        status,
        model: state.services.model_name().to_string(),
        chroma_path: state.config.store_path.clone(),
    })
}
