use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{health::health, query::query};

pub mod api_state;
pub mod error;
mod routes;

/// Query and health endpoints, meant to be nested under `/api`.
pub fn api_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/query", post(query))
        .route("/health", get(health))
}
