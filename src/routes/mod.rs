//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`, caller identified by `X-User-Id`
/// - CORS (allow any origin/method/headers) – adjust for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/riddle/generate", post(http::http_generate_riddle))
        .route("/api/v1/riddle/guess", post(http::http_submit_guess))
        .route("/api/v1/riddle/give-up", post(http::http_give_up))
        .route("/api/v1/riddle/attempts", get(http::http_generation_attempts))
        .route("/api/v1/riddles/daily-status", get(http::http_daily_status))
        .route(
            "/api/v1/user/settings",
            get(http::http_get_settings).patch(http::http_patch_settings),
        )
        .route("/api/v1/models/available", get(http::http_models_available))
        .route("/api/v1/models/pull", post(http::http_pull_model))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}
