//! `POST /v1/documents`: ingest a named document.
//!
//! Body: `{name, content_type?, text}` or `{name, content_type?, content_base64}`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use serde::Deserialize;

use docent_domain::error::Error;

use crate::api::api_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub content_base64: Option<String>,
}

impl IngestRequest {
    fn into_payload(self) -> Result<(String, Vec<u8>, String), String> {
        let (bytes, default_type) = match (self.text, self.content_base64) {
            (Some(text), None) => (text.into_bytes(), "text/plain"),
            (None, Some(b64)) => (
                base64::engine::general_purpose::STANDARD
                    .decode(b64.trim())
                    .map_err(|e| format!("content_base64 is not valid base64: {e}"))?,
                "",
            ),
            (Some(_), Some(_)) => return Err("send either text or content_base64, not both".into()),
            (None, None) => return Err("one of text or content_base64 is required".into()),
        };
        let content_type = self
            .content_type
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| default_type.to_string());
        Ok((self.name, bytes, content_type))
    }
}

pub async fn ingest_document(
    State(state): State<AppState>,
    Json(body): Json<IngestRequest>,
) -> Response {
    let (name, bytes, content_type) = match body.into_payload() {
        Ok(p) => p,
        Err(msg) => return api_error(StatusCode::BAD_REQUEST, msg),
    };

    match state.ingestor.ingest(&name, &bytes, &content_type).await {
        Ok(report) => (StatusCode::CREATED, Json(report)).into_response(),
        Err(e @ Error::Config(_)) => api_error(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::warn!(document = %name, error = %e, "ingestion failed");
            api_error(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
