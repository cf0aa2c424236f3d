//! The bounded model/capability loop for one user message.
//!
//! `Building → Streaming → (Dispatch → Streaming)* → Terminal`. The loop
//! emits `text`, `status` and `info` events as it goes; the owning session
//! actor commits the outcome to history and emits the terminal `stop` or
//! `error` itself, so the loop never touches shared state.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::Instrument;

use docent_domain::config::TurnConfig;
use docent_domain::error::{Error, Result};
use docent_domain::event::SessionEvent;
use docent_domain::stream::{StreamEvent, Usage};
use docent_domain::tool::{Message, ToolCall};
use docent_domain::trace::TraceEvent;
use docent_providers::{ChatRequest, Inference};
use docent_retrieval::{RetrievalIndex, RetrievedChunk};

use super::capabilities::{CallContext, CapabilityRegistry};

/// Everything a turn needs besides the session's own history.
pub struct TurnDeps {
    pub inference: Arc<dyn Inference>,
    pub retrieval: Arc<RetrievalIndex>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub turn: TurnConfig,
    pub top_k: usize,
    pub temperature: f32,
}

/// What a finished turn hands back to its session.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The user message, committed whatever the result.
    pub user: Message,
    /// The assistant reply, or the failure that aborted the turn.
    pub result: Result<Message>,
    pub round_trips: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// run_turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one turn against `history` (committed messages only).
///
/// Events are sent in emission order on `events`; a closed receiver is
/// ignored so the turn still completes and commits.
pub async fn run_turn(
    deps: &TurnDeps,
    history: &[Message],
    ctx: &CallContext,
    prompt: &str,
    events: &mpsc::Sender<SessionEvent>,
) -> TurnOutcome {
    let span = tracing::info_span!(
        "turn",
        session_id = %ctx.session_id,
        connection_id = %ctx.connection_id,
    );
    let user = Message::user(prompt);
    let mut round_trips = 0;
    let result = drive(deps, history, ctx, &user, events, &mut round_trips)
        .instrument(span)
        .await;
    TurnOutcome {
        user,
        result,
        round_trips,
    }
}

async fn drive(
    deps: &TurnDeps,
    history: &[Message],
    ctx: &CallContext,
    user: &Message,
    events: &mpsc::Sender<SessionEvent>,
    round_trips: &mut usize,
) -> Result<Message> {
    // ── Building ─────────────────────────────────────────────────────
    let prompt = user.content.extract_all_text();
    let context = deps.retrieval.query(&prompt, deps.top_k).await;
    let system_prompt = build_system_prompt(&deps.turn.system_prompt, &context);
    TraceEvent::ContextBuilt {
        session_id: ctx.session_id.clone(),
        chunks: context.len(),
        context_chars: system_prompt.len(),
    }
    .emit();

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(history.iter().cloned());
    messages.push(user.clone());

    let tool_defs = deps.capabilities.definitions();
    let mut total_usage = Usage::default();

    loop {
        // ── Streaming ────────────────────────────────────────────────
        let req = ChatRequest {
            messages: messages.clone(),
            tools: tool_defs.clone(),
            temperature: Some(deps.temperature),
            ..Default::default()
        };
        let pass = stream_pass(deps.inference.as_ref(), &req, events)
            .instrument(tracing::info_span!(
                "llm.call",
                "otel.kind" = "CLIENT",
                provider = %deps.inference.provider_id(),
                round = *round_trips,
            ))
            .await?;
        if let Some(u) = &pass.usage {
            total_usage.add(u);
        }

        if pass.tool_calls.is_empty() {
            tracing::debug!(
                round_trips = *round_trips,
                prompt_tokens = total_usage.prompt_tokens,
                completion_tokens = total_usage.completion_tokens,
                "turn finished"
            );
            return Ok(Message::assistant(pass.text));
        }

        if *round_trips >= deps.turn.max_round_trips {
            tracing::warn!(
                max_round_trips = deps.turn.max_round_trips,
                pending_calls = pass.tool_calls.len(),
                "round-trip limit reached, ending turn"
            );
            send(
                events,
                SessionEvent::info(format!(
                    "Stopped after {} tool round trips.",
                    deps.turn.max_round_trips
                )),
            )
            .await;
            return Ok(Message::assistant(pass.text));
        }

        // ── Dispatch ─────────────────────────────────────────────────
        *round_trips += 1;
        messages.push(Message::assistant_tool_calls(&pass.text, &pass.tool_calls));

        for tc in &pass.tool_calls {
            send(events, SessionEvent::status(tc.tool_name.clone())).await;
        }

        // Results come back in call order.
        let results = futures_util::future::join_all(
            pass.tool_calls
                .iter()
                .map(|tc| deps.capabilities.dispatch(&tc.tool_name, &tc.arguments, ctx)),
        )
        .await;

        for (tc, result) in pass.tool_calls.iter().zip(results) {
            messages.push(Message::tool_result(
                &tc.call_id,
                result.content,
                result.is_error,
            ));
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// One streaming pass
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Pass {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

async fn stream_pass(
    inference: &dyn Inference,
    req: &ChatRequest,
    events: &mpsc::Sender<SessionEvent>,
) -> Result<Pass> {
    let mut stream = inference.chat_stream(req).await.map_err(turn_error)?;

    let mut text_buf = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage = None;

    // Calls that arrive as start + deltas, in arrival order:
    // (call_id, name, args_json).
    let mut tc_bufs: Vec<(String, String, String)> = Vec::new();

    while let Some(event) = stream.next().await {
        match event.map_err(turn_error)? {
            StreamEvent::Token { text } => {
                if text.is_empty() {
                    continue;
                }
                text_buf.push_str(&text);
                send(events, SessionEvent::text(text)).await;
            }
            StreamEvent::ToolCallStarted { call_id, tool_name } => {
                tc_bufs.push((call_id, tool_name, String::new()));
            }
            StreamEvent::ToolCallDelta { call_id, delta } => {
                if let Some((_, _, args)) = tc_bufs.iter_mut().find(|(id, _, _)| *id == call_id) {
                    args.push_str(&delta);
                }
            }
            StreamEvent::ToolCallFinished {
                call_id,
                tool_name,
                arguments,
            } => {
                tc_bufs.retain(|(id, _, _)| *id != call_id);
                tool_calls.push(ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                });
            }
            StreamEvent::Done { usage: u, .. } => {
                usage = u;
            }
            StreamEvent::Error { message } => {
                return Err(Error::Turn(message));
            }
        }
    }

    // Assemble calls that never got a ToolCallFinished.
    for (call_id, tool_name, args_str) in tc_bufs {
        tool_calls.push(ToolCall {
            arguments: parse_arguments(&call_id, &tool_name, &args_str),
            call_id,
            tool_name,
        });
    }

    Ok(Pass {
        text: text_buf,
        tool_calls,
        usage,
    })
}

/// Empty arguments mean `{}`. Malformed JSON is handed to the registry
/// as-is so the model gets a validation error back instead of a guess.
fn parse_arguments(call_id: &str, tool_name: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                call_id = %call_id,
                capability = %tool_name,
                error = %e,
                "tool call arguments are not valid JSON"
            );
            Value::String(raw.to_string())
        }
    }
}

fn turn_error(e: Error) -> Error {
    match e {
        Error::Turn(_) => e,
        other => Error::Turn(other.to_string()),
    }
}

async fn send(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    // A dropped receiver only means nobody is listening any more.
    let _ = events.send(event).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System prompt
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn build_system_prompt(instruction: &str, context: &[RetrievedChunk]) -> String {
    if context.is_empty() {
        return instruction.to_string();
    }
    let mut out = String::with_capacity(instruction.len() + 256);
    out.push_str(instruction);
    out.push_str("\n\n## Context from ingested documents\n");
    for (i, chunk) in context.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {} (part {})\n{}\n",
            i + 1,
            chunk.metadata.source_id,
            chunk.metadata.chunk_index,
            chunk.text.trim()
        ));
    }
    out
}
