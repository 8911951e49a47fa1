use axum::{extract::State, routing::get, Json, Router};

use crate::models::HealthResponse;

#[derive(Clone)]
pub struct HealthState {
    pub finalized_store: &'static str,
}

pub fn router(finalized_store: &'static str) -> Router {
    let state = HealthState { finalized_store };
    Router::new()
        .route("/api/v1/health", get(health_check))
        .with_state(state)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        finalized_store: state.finalized_store.to_string(),
    })
}
