//! Router construction.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Build the gateway router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/get_credentials", post(handlers::get_credentials))
        .route("/generate", post(handlers::generate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
