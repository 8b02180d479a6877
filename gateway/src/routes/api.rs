use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, recording};
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST API router
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/calls", get(api::list_calls))
        .route("/recordings/{call_id}", get(recording::download_recording))
        .layer(TraceLayer::new_for_http())
}
