//! Telephony WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::telephony::telephony_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the telephony WebSocket router
///
/// # Endpoint
///
/// `GET /telephony` - WebSocket upgrade, one call per connection
pub fn create_telephony_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/telephony", get(telephony_handler))
        .layer(TraceLayer::new_for_http())
}
