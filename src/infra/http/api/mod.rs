pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub fn build_api_router(state: ApiState) -> Router<ApiState> {
    Router::new()
        .route("/api/v1/purge", post(handlers::purge))
        .route("/api/v1/ban", post(handlers::ban))
        .route("/api/v1/bans", get(handlers::list_bans))
        .route("/api/v1/changes", post(handlers::notify_change))
        .route("/api/v1/bindings", get(handlers::binding_counts))
        .route(
            "/api/v1/sections/{id}/bindings",
            get(handlers::list_section_bindings).put(handlers::replace_section_bindings),
        )
        .route(
            "/api/v1/uris",
            post(handlers::record_uri).delete(handlers::forget_uri),
        )
        .route("/api/v1/diagnostics/purge", post(handlers::test_purge))
        .route("/api/v1/diagnostics/bindings", post(handlers::test_bindings))
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::api_auth,
        ))
}
