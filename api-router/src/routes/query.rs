use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};
use common::storage::types::conversation::ConversationTurn;
use retrieval_pipeline::{answer_query, QueryMode, Source};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub answer: String,
    pub mode: QueryMode,
    pub sources: Vec<Source>,
    pub history: Vec<ConversationTurn>,
}

pub async fn query(
    State(state): State<ApiState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let outcome = answer_query(
        state.services.as_ref(),
        &state.settings,
        &request.query,
        request.history,
    )
    .await?;

    info!(
        mode = %outcome.mode,
        sources = outcome.sources.len(),
        follow_up = outcome.plan.follow_up,
        "query answered"
    );

    Ok(Json(QueryResponse {
        query: outcome.query,
        answer: outcome.answer,
        mode: outcome.mode,
        sources: outcome.sources,
        history: outcome.history,
    }))
}
