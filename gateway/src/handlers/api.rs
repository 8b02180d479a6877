use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::core::registry::ActiveCall;
use crate::state::AppState;

/// Health check
pub async fn health_check() -> impl IntoResponse {
    Json(json!({"status": "OK"}))
}

#[derive(Debug, Serialize)]
pub struct ActiveCallsResponse {
    pub count: usize,
    pub calls: Vec<ActiveCall>,
}

/// Calls currently registered on this instance
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<ActiveCallsResponse> {
    let calls = state.registry().active_calls();
    Json(ActiveCallsResponse {
        count: calls.len(),
        calls,
    })
}
