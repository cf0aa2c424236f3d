use serde::Serialize;

/// Structured trace events emitted across all docent crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ContextBuilt {
        session_id: String,
        chunks: usize,
        context_chars: usize,
    },
    DocumentIndexed {
        source_id: String,
        chunks_total: usize,
        chunks_indexed: usize,
    },
    CapabilityInvoked {
        name: String,
        duration_ms: u64,
        is_error: bool,
    },
    LlmRequest {
        provider: String,
        model: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    TaskStepCompleted {
        run_id: String,
        step: String,
        attempt: u32,
        reused: bool,
    },
    TaskRunFinished {
        run_id: String,
        status: String,
    },
    NotificationDelivered {
        session_id: String,
        connections: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "docent_event");
    }
}
