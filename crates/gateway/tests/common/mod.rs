//! Shared doubles and wiring for gateway integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};

use docent_domain::config::Config;
use docent_domain::error::{Error, Result};
use docent_domain::event::SessionEvent;
use docent_domain::stream::{BoxStream, StreamEvent};
use docent_domain::tool::{ContentPart, Message, MessageContent, Role};
use docent_gateway::bootstrap::{assemble, Collaborators};
use docent_gateway::runtime::SessionHandle;
use docent_gateway::state::AppState;
use docent_providers::{ChatRequest, ChatResponse, GeneratedImage, Inference};
use docent_retrieval::InMemoryVectorIndex;
use docent_tasks::JsonlStepLog;
use docent_tools::{Browser, FsObjectStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted inference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One scripted `chat_stream` response. A gated script yields its first
/// event, then waits for a permit before yielding the rest.
struct Script {
    events: std::result::Result<Vec<StreamEvent>, String>,
    gate: Option<Arc<Semaphore>>,
}

/// Plays back one scripted stream per `chat_stream` call and one canned
/// reply per `chat` call. Embeds text as letter frequencies.
#[derive(Default)]
pub struct ScriptedInference {
    streams: Mutex<VecDeque<Script>>,
    chat_replies: Mutex<VecDeque<String>>,
    /// Every streaming request, in order.
    pub requests: Mutex<Vec<ChatRequest>>,
    /// Every prompt passed to `image_from_prompt`.
    pub image_prompts: Mutex<Vec<String>>,
    /// When set, each `chat` call takes one permit first.
    chat_gate: Option<Arc<Semaphore>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(gate: Arc<Semaphore>) -> Self {
        Self {
            chat_gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn stream(self, events: Vec<StreamEvent>) -> Self {
        self.streams.lock().push_back(Script { events: Ok(events), gate: None });
        self
    }

    /// A stream that stalls after its first event until `gate` has a permit.
    pub fn gated_stream(self, events: Vec<StreamEvent>, gate: Arc<Semaphore>) -> Self {
        self.streams.lock().push_back(Script { events: Ok(events), gate: Some(gate) });
        self
    }

    pub fn failing_stream(self, message: &str) -> Self {
        self.streams.lock().push_back(Script { events: Err(message.to_string()), gate: None });
        self
    }

    pub fn chat_reply(self, reply: &str) -> Self {
        self.chat_replies.lock().push_back(reply.to_string());
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn request(&self, i: usize) -> ChatRequest {
        self.requests.lock()[i].clone()
    }
}

#[async_trait::async_trait]
impl Inference for ScriptedInference {
    async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse> {
        if let Some(gate) = &self.chat_gate {
            gate.acquire()
                .await
                .map_err(|_| Error::Other("gate closed".into()))?
                .forget();
        }
        let content = self
            .chat_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| "scripted reply".to_string());
        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
            usage: None,
            model: "scripted".into(),
            finish_reason: Some("stop".into()),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        self.requests.lock().push(req.clone());
        let next = self.streams.lock().pop_front().unwrap_or(Script {
            events: Err("script exhausted".to_string()),
            gate: None,
        });
        match next.events {
            Ok(events) => {
                let mut events = events.into_iter().map(Ok);
                let head: Vec<Result<StreamEvent>> = events.by_ref().take(1).collect();
                let rest: Vec<Result<StreamEvent>> = events.collect();
                let gate = next.gate;
                let wait = futures_util::stream::once(async move {
                    if let Some(gate) = gate {
                        if let Ok(permit) = gate.acquire_owned().await {
                            permit.forget();
                        }
                    }
                })
                .filter_map(|()| async { None::<Result<StreamEvent>> });
                Ok(Box::pin(
                    futures_util::stream::iter(head)
                        .chain(wait)
                        .chain(futures_util::stream::iter(rest)),
                ))
            }
            Err(message) => Err(Error::Provider {
                provider: "scripted".into(),
                message,
            }),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; 26];
        for b in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
            v[(b - b'a') as usize] += 1.0;
        }
        Ok(v)
    }

    async fn image_from_prompt(&self, prompt: &str) -> Result<GeneratedImage> {
        self.image_prompts.lock().push(prompt.to_string());
        Ok(GeneratedImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".into(),
        })
    }

    async fn document_to_text(&self, _bytes: &[u8], content_type: &str) -> Result<String> {
        Ok(format!("extracted text from a {content_type} document about lighthouses"))
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

// ── Stream builders ─────────────────────────────────────────────────

fn done() -> StreamEvent {
    StreamEvent::Done {
        usage: None,
        finish_reason: Some("stop".into()),
    }
}

/// A plain reply, delivered as one token per word.
pub fn reply(text: &str) -> Vec<StreamEvent> {
    let mut events: Vec<StreamEvent> = text
        .split_inclusive(' ')
        .map(|t| StreamEvent::Token { text: t.to_string() })
        .collect();
    events.push(done());
    events
}

/// One tool call, streamed as start + two argument deltas.
pub fn tool_call(call_id: &str, name: &str, args: Value) -> Vec<StreamEvent> {
    let raw = args.to_string();
    let mid = raw.len() / 2;
    vec![
        StreamEvent::ToolCallStarted {
            call_id: call_id.into(),
            tool_name: name.into(),
        },
        StreamEvent::ToolCallDelta {
            call_id: call_id.into(),
            delta: raw[..mid].to_string(),
        },
        StreamEvent::ToolCallDelta {
            call_id: call_id.into(),
            delta: raw[mid..].to_string(),
        },
        done(),
    ]
}

/// The tool result the model saw for `call_id` in a request.
pub fn tool_result_in(req: &ChatRequest, call_id: &str) -> Option<(String, bool)> {
    req.messages.iter().find_map(|m| match (&m.role, &m.content) {
        (Role::Tool, MessageContent::Parts(parts)) => parts.iter().find_map(|p| match p {
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } if tool_use_id == call_id => Some((content.clone(), *is_error)),
            _ => None,
        }),
        _ => None,
    })
}

pub fn system_prompt_of(req: &ChatRequest) -> String {
    req.messages
        .first()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.extract_all_text())
        .unwrap_or_default()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browsers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Returns the same text for every URL and records what was fetched.
pub struct StaticBrowser {
    text: String,
    pub urls: Mutex<Vec<String>>,
}

impl StaticBrowser {
    pub fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.into(),
            urls: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait::async_trait]
impl Browser for StaticBrowser {
    async fn fetch_visible_text(&self, url: &str) -> Result<String> {
        self.urls.lock().push(url.to_string());
        Ok(self.text.clone())
    }
}

pub struct FailingBrowser;

#[async_trait::async_trait]
impl Browser for FailingBrowser {
    async fn fetch_visible_text(&self, url: &str) -> Result<String> {
        Err(Error::Timeout(format!("navigating to {url}")))
    }
}

pub struct PanickingBrowser;

#[async_trait::async_trait]
impl Browser for PanickingBrowser {
    async fn fetch_visible_text(&self, _url: &str) -> Result<String> {
        panic!("browser driver crashed");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub state: AppState,
    pub inference: Arc<ScriptedInference>,
    pub dir: tempfile::TempDir,
}

pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.storage.root = dir.path().to_path_buf();
    config.tasks.initial_backoff_ms = 1;
    config.tasks.max_backoff_ms = 5;
    config
}

pub fn harness(inference: ScriptedInference, browser: Arc<dyn Browser>) -> Harness {
    harness_with(inference, browser, |_| {})
}

pub fn harness_with(
    inference: ScriptedInference,
    browser: Arc<dyn Browser>,
    tweak: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    tweak(&mut config);
    let inference = Arc::new(inference);
    let state = assemble(
        Arc::new(config.clone()),
        Collaborators {
            inference: inference.clone(),
            browser,
            objects: Arc::new(FsObjectStore::new(config.storage.objects_dir()).unwrap()),
            index: Arc::new(InMemoryVectorIndex::new()),
            step_log: Arc::new(JsonlStepLog::new(config.storage.runs_dir()).unwrap()),
        },
    )
    .unwrap();
    Harness {
        state,
        inference,
        dir,
    }
}

/// Open `session_id` and attach a fresh connection to it.
pub async fn connect(
    state: &AppState,
    session_id: &str,
) -> (SessionHandle, String, mpsc::Receiver<SessionEvent>) {
    connect_with_capacity(state, session_id, 64).await
}

/// Like [`connect`], with a connection buffer of `capacity` events.
pub async fn connect_with_capacity(
    state: &AppState,
    session_id: &str,
    capacity: usize,
) -> (SessionHandle, String, mpsc::Receiver<SessionEvent>) {
    let handle = state.open_session(session_id);
    let connection_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(capacity);
    handle.attach(connection_id.clone(), tx).await.unwrap();
    (handle, connection_id, rx)
}

/// Events up to and including the next `stop` or `error`.
pub async fn until_terminal(rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("session event channel closed");
        let terminal = ev.is_terminal();
        out.push(ev);
        if terminal {
            return out;
        }
    }
}

pub fn text_of(events: &[SessionEvent]) -> String {
    events
        .iter()
        .filter(|e| e.kind == docent_domain::event::EventKind::Text)
        .map(|e| e.content.as_str())
        .collect()
}

pub fn roles(messages: &[Message]) -> Vec<Role> {
    messages.iter().map(|m| m.role).collect()
}
