//! The wire shapes exchanged with a live session connection.
//!
//! Outbound: one [`SessionEvent`] per frame, `{"type": ..., "content": ...}`.
//! Inbound: one [`InboundMessage`] per frame, `{"prompt": ...}`.

use serde::{Deserialize, Serialize};

/// Kind of an outbound session event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A fragment of assistant text, delivered as soon as it arrives.
    Text,
    /// A capability is about to run.
    Status,
    /// Informational notice (e.g. the round-trip bound was reached).
    Info,
    /// The turn failed; exactly one per failed turn.
    Error,
    /// The turn (or a task notification) is complete.
    Stop,
}

/// Event pushed to every connection attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub content: String,
}

impl SessionEvent {
    pub fn text(content: impl Into<String>) -> Self {
        Self { kind: EventKind::Text, content: content.into() }
    }
    pub fn status(content: impl Into<String>) -> Self {
        Self { kind: EventKind::Status, content: content.into() }
    }
    pub fn info(content: impl Into<String>) -> Self {
        Self { kind: EventKind::Info, content: content.into() }
    }
    pub fn error(content: impl Into<String>) -> Self {
        Self { kind: EventKind::Error, content: content.into() }
    }
    pub fn stop() -> Self {
        Self { kind: EventKind::Stop, content: String::new() }
    }

    /// `stop` and `error` both end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Stop | EventKind::Error)
    }
}

/// Inbound message from a connection.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub prompt: String,
}
