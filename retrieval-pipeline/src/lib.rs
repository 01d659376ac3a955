#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod answer;
pub mod history;
pub mod routing;
pub mod services;

use common::{
    error::AppError,
    storage::types::{conversation::ConversationTurn, document_chunk::ChunkMatch},
};
use tracing::{info, instrument};

pub use answer::Source;
pub use routing::{plan_query, QueryMode, QueryPlan, QuerySettings};
pub use services::{DefaultQueryServices, QueryServices};

use answer::{collect_sources, create_user_message_with_history, NO_CONTEXT_REPLY};
use history::{append_exchange, trim_history};

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: String,
    pub answer: String,
    pub mode: QueryMode,
    pub sources: Vec<Source>,
    /// Trimmed history including this exchange.
    pub history: Vec<ConversationTurn>,
    pub plan: QueryPlan,
}

/// Chunks for a planned query; follow-ups retrieve nothing.
pub async fn retrieve(
    services: &dyn QueryServices,
    plan: &QueryPlan,
    query: &str,
) -> Result<Vec<ChunkMatch>, AppError> {
    if plan.follow_up {
        return Ok(Vec::new());
    }
    let embedding = services.embed_query(query).await?;
    services.search(embedding, &plan.filter, plan.limit).await
}

#[instrument(skip_all)]
pub async fn answer_query(
    services: &dyn QueryServices,
    settings: &QuerySettings,
    query: &str,
    history: Vec<ConversationTurn>,
) -> Result<QueryOutcome, AppError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::Validation("No query provided".into()));
    }

    let history = trim_history(history, settings.history_max_pairs);
    let plan = plan_query(query, &history, settings);
    info!(
        mode = %plan.mode,
        unit = plan.unit.as_deref().unwrap_or("-"),
        follow_up = plan.follow_up,
        limit = plan.limit,
        "routing query"
    );

    let contexts = retrieve(services, &plan, query).await?;

    let answer = if contexts.is_empty() && !plan.follow_up {
        NO_CONTEXT_REPLY.to_string()
    } else {
        let user_message = create_user_message_with_history(&contexts, &history, query);
        services.complete(plan.mode, user_message).await?
    };

    let sources = collect_sources(&contexts);
    let history = append_exchange(history, query, &answer, settings.history_max_pairs);

    Ok(QueryOutcome {
        query: query.to_string(),
        answer,
        mode: plan.mode,
        sources,
        history,
        plan,
    })
}
