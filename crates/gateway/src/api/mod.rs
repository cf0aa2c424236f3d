pub mod documents;
pub mod sessions;
pub mod tasks;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Uploaded documents arrive base64-encoded inside JSON.
const DOCUMENT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Sessions
        .route("/v1/sessions/:id/ws", get(sessions::session_ws))
        .route("/v1/sessions/:id/messages", get(sessions::get_messages))
        // Ingestion
        .route(
            "/v1/documents",
            post(documents::ingest_document).layer(DefaultBodyLimit::max(DOCUMENT_BODY_LIMIT)),
        )
        // Task runs
        .route("/v1/tasks/:run_id", get(tasks::get_task))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
