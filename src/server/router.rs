use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::AppState;

/// Build the complete axum Router with all API routes.
///
/// The proxy endpoints are only mounted when `PROXY_ENABLED` is set.
pub fn build(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health))
        .route("/classify", post(handlers::classify))
        .route("/redact", post(handlers::redact))
        .route("/detokenize", post(handlers::detokenize))
        .route("/route", post(handlers::route_plan))
        .route("/audit/query", post(handlers::audit_query));

    if state.config.proxy_enabled {
        router = router
            .route("/v1/chat/completions", post(handlers::proxy_openai))
            .route("/v1/messages", post(handlers::proxy_anthropic))
            .route("/v1/models/:model_action", post(handlers::proxy_google))
            .route("/v1beta/models/:model_action", post(handlers::proxy_google));
    }

    router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
