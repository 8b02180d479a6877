use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

pub mod api;
pub mod telephony;

/// Every route the gateway serves, bound to `state`.
pub fn create_router(state: Arc<AppState>) -> Router {
    api::create_api_router()
        .merge(telephony::create_telephony_router())
        .with_state(state)
}
