use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{error, info};

use crate::core::call::recorder::recording_file_name;
use crate::state::AppState;

const CONTENT_TYPE: &str = "audio/wav";

fn is_valid_call_id(call_id: &str) -> bool {
    !call_id.is_empty() && !call_id.contains("..") && !call_id.contains('/')
}

/// Download the stereo WAV recording of a finished call
pub async fn download_recording(
    State(state): State<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Response {
    info!(call_id = %call_id, "Recording download requested");

    if !is_valid_call_id(&call_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid call_id format"})),
        )
            .into_response();
    }

    let Some(dir) = &state.services.recordings_dir else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "Recording storage not configured"})),
        )
            .into_response();
    };

    let file_name = recording_file_name(&call_id);
    let body = match tokio::fs::read(dir.join(&file_name)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(call_id = %call_id, "Recording not found");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("Recording not found: {}", call_id)})),
            )
                .into_response();
        }
        Err(e) => {
            error!(call_id = %call_id, "Failed to read recording: {}", e);
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "Failed to read recording"})),
            )
                .into_response();
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    (StatusCode::OK, headers, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_id_validation() {
        assert!(is_valid_call_id("CA1234-abc"));
        assert!(!is_valid_call_id(""));
        assert!(!is_valid_call_id("../etc/passwd"));
        assert!(!is_valid_call_id("a/b"));
    }
}
