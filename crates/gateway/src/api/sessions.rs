//! Session endpoints.
//!
//! - `GET /v1/sessions/:id/ws`: attach a live connection
//! - `GET /v1/sessions/:id/messages`: committed history
//!
//! WebSocket flow: the upgrade opens (or creates) the session actor and
//! attaches this connection. Each inbound text frame is `{"prompt": ...}`;
//! each outbound frame is one `{"type": ..., "content": ...}` event.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use docent_domain::event::{InboundMessage, SessionEvent};

use crate::api::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/ws
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if session_id.trim().is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "session id must not be empty");
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let session = state.open_session(&session_id);
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (events_tx, mut events_rx) =
        mpsc::channel::<SessionEvent>(state.config.sessions.inbox_capacity.max(1));

    if let Err(e) = session.attach(connection_id.clone(), events_tx.clone()).await {
        tracing::warn!(session_id = %session_id, error = %e, "attach failed");
        return;
    }
    tracing::info!(session_id = %session_id, connection_id = %connection_id, "connection opened");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Session events → socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize session event");
                    continue;
                }
            };
            if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Socket → session.
    while let Some(frame) = ws_stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(t)) => t,
            Ok(WsMessage::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        match serde_json::from_str::<InboundMessage>(&text) {
            Ok(msg) if !msg.prompt.trim().is_empty() => {
                if let Err(e) = session.prompt(connection_id.clone(), msg.prompt).await {
                    tracing::warn!(session_id = %session_id, error = %e, "session rejected prompt");
                    break;
                }
            }
            // Rejections can land mid-turn, so they are never terminal.
            Ok(_) => {
                let _ = events_tx.try_send(SessionEvent::info("prompt must not be empty"));
            }
            Err(e) => {
                let _ = events_tx.try_send(SessionEvent::info(format!("invalid message: {e}")));
            }
        }
    }

    let _ = session.detach(connection_id.clone()).await;
    drop(events_tx);
    writer.abort();
    tracing::info!(session_id = %session_id, connection_id = %connection_id, "connection closed");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.sessions.resolve(&session_id) else {
        return api_error(StatusCode::NOT_FOUND, format!("no live session '{session_id}'"));
    };
    match session.messages().await {
        Ok(messages) => Json(serde_json::json!({
            "session_id": session_id,
            "messages": messages,
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::GONE, e.to_string()),
    }
}
