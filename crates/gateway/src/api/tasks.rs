//! `GET /v1/tasks/:run_id`: a task run as reconstructed from its step log.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use docent_domain::error::Error;

use crate::api::api_error;
use crate::state::AppState;

pub async fn get_task(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    match state.engine.get(&run_id).await {
        Ok(Some(run)) => {
            let active = state.engine.is_active(&run.id);
            let mut body = match serde_json::to_value(&run) {
                Ok(v) => v,
                Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            };
            body["active"] = serde_json::Value::Bool(active);
            Json(body).into_response()
        }
        Ok(None) => api_error(StatusCode::NOT_FOUND, format!("no task run '{run_id}'")),
        // Ids that could never name a run.
        Err(e @ Error::NotFound(_)) => api_error(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
