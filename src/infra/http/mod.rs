pub mod api;
mod middleware;

pub use api::{ApiState, build_api_router};

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router, middleware as axum_middleware};
use sluice_api_types::HealthResponse;

use crate::application::error::AppError;
use crate::infra::error::InfraError;

use self::middleware::{log_responses, set_request_context};

/// Full HTTP surface: unauthenticated `/health` plus the `/api/v1` routes.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(build_api_router(state.clone()))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let database = match state.db.as_ref() {
        Some(db) => {
            db.health_check().await.map_err(InfraError::from)?;
            true
        }
        None => false,
    };

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        hosts: state.service.registry().len(),
        database,
    }))
}
