//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, Together, and any other
//! endpoint that follows the OpenAI chat completions, embeddings, and
//! image generation contracts.

use crate::traits::{is_textual, ChatRequest, ChatResponse, GeneratedImage, Inference};
use crate::util::{from_reqwest, http_status_error};
use base64::Engine as _;
use docent_domain::config::LlmConfig;
use docent_domain::error::{Error, Result};
use docent_domain::stream::{BoxStream, StreamEvent, Usage};
use docent_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use docent_domain::trace::TraceEvent;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

const EXTRACTION_INSTRUCTION: &str = "Transcribe all readable text in this document. \
     Preserve headings, lists and table rows as plain text. Output only the text.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    chat_model: String,
    embedding_model: String,
    image_model: String,
    vision_model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(cfg: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.provider_id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            chat_model: cfg.chat_model.clone(),
            embedding_model: cfg.embedding_model.clone(),
            image_model: cfg.image_model.clone(),
            vision_model: cfg.effective_vision_model().to_string(),
            temperature: cfg.temperature,
            client,
        })
    }

    // ── Internal: request plumbing ─────────────────────────────────

    fn authed_post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// POST a JSON body and return the parsed JSON response.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let resp = self
            .authed_post(path)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(http_status_error(&self.id, status, &text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.chat_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
            "temperature": req.temperature.unwrap_or(self.temperature),
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    /// A single-message vision request carrying `part` next to the
    /// extraction instruction.
    fn extraction_body(&self, part: Value) -> Value {
        serde_json::json!({
            "model": self.vision_model,
            "temperature": 0.0,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": EXTRACTION_INSTRUCTION},
                    part,
                ],
            }],
        })
    }

    async fn fetch_image_url(&self, url: &str) -> Result<GeneratedImage> {
        let resp = self.client.get(url).send().await.map_err(from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(http_status_error(&self.id, status, ""));
        }
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = resp.bytes().await.map_err(from_reqwest)?;
        Ok(GeneratedImage { bytes: bytes.to_vec(), content_type })
    }

    fn provider_error(&self, message: impl Into<String>) -> Error {
        Error::Provider { provider: self.id.clone(), message: message.into() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        Role::User => user_to_openai(msg),
        Role::System => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

/// User messages with image parts use the array content form; everything
/// else is a plain string.
fn user_to_openai(msg: &Message) -> Value {
    let parts = match &msg.content {
        MessageContent::Parts(parts)
            if parts.iter().any(|p| matches!(p, ContentPart::Image { .. })) =>
        {
            parts
        }
        other => {
            return serde_json::json!({"role": "user", "content": other.extract_all_text()});
        }
    };

    let content: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(serde_json::json!({"type": "text", "text": text})),
            ContentPart::Image { url, .. } => {
                Some(serde_json::json!({"type": "image_url", "image_url": {"url": url}}))
            }
            _ => None,
        })
        .collect();
    serde_json::json!({"role": "user", "content": content})
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_parts.push(text),
                    ContentPart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    _ => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    let found = match &msg.content {
        MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
            ContentPart::ToolResult { tool_use_id, content, .. } => {
                Some((tool_use_id.as_str(), content.as_str()))
            }
            _ => None,
        }),
        MessageContent::Text(t) => Some(("", t.as_str())),
    };
    let (id, content) = found.unwrap_or(("", ""));
    serde_json::json!({
        "role": "tool",
        "tool_call_id": id,
        "content": content,
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").ok_or_else(|| Error::Provider {
        provider: provider.into(),
        message: "no message in choice".into(),
    })?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        tool_calls: parse_openai_tool_calls(message),
        usage: body.get("usage").and_then(parse_openai_usage),
        model,
        finish_reason,
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let Some(arr) = message.get("tool_calls").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|tc| {
            let call_id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let tool_name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("{}");
            let arguments: Value =
                serde_json::from_str(args_str).unwrap_or(Value::Object(Default::default()));
            Some(ToolCall { call_id, tool_name, arguments })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_embedding(provider: &str, body: &Value) -> Result<Vec<f32>> {
    let embedding = body
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "missing 'data[0].embedding' in embeddings response".into(),
        })?;

    Ok(embedding
        .iter()
        .filter_map(|v| v.as_f64().map(|f| f as f32))
        .collect())
}

/// What an images response carried for the first image.
#[derive(Debug, PartialEq)]
enum ImagePayload {
    Inline(Vec<u8>),
    Url(String),
}

fn parse_image_response(provider: &str, body: &Value) -> Result<ImagePayload> {
    let first = body
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.into(),
            message: "no images in response".into(),
        })?;

    if let Some(b64) = first.get("b64_json").and_then(|v| v.as_str()) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| Error::Provider {
                provider: provider.into(),
                message: format!("invalid base64 image: {e}"),
            })?;
        return Ok(ImagePayload::Inline(bytes));
    }
    if let Some(url) = first.get("url").and_then(|v| v.as_str()) {
        return Ok(ImagePayload::Url(url.to_string()));
    }
    Err(Error::Provider {
        provider: provider.into(),
        message: "image entry has neither b64_json nor url".into(),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE streaming state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Carries what a streaming response spreads across chunks.
///
/// Argument deltas only name the tool call by `index`; the id appears once,
/// on the first chunk for that index. Finish reason and usage arrive in
/// separate chunks and are reported together on `[DONE]`.
#[derive(Default)]
struct StreamState {
    ids_by_index: HashMap<u64, String>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamState {
    fn parse(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            return vec![Ok(StreamEvent::Done {
                usage: self.usage.take(),
                finish_reason: Some(self.finish_reason.take().unwrap_or_else(|| "stop".into())),
            })];
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
            self.usage = Some(usage);
        }

        let Some(choice) = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
        else {
            return Vec::new();
        };

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            self.finish_reason = Some(fr.to_string());
        }

        let mut events = Vec::new();
        let delta = choice.get("delta").unwrap_or(&Value::Null);

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token { text: text.to_string() }));
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let func = tc.get("function");

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    let name = func
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    self.ids_by_index.insert(index, id.to_string());
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        call_id: id.to_string(),
                        tool_name: name.to_string(),
                    }));
                }

                let args = func
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                if !args.is_empty() {
                    let call_id = self
                        .ids_by_index
                        .get(&index)
                        .cloned()
                        .unwrap_or_else(|| format!("call_{index}"));
                    events.push(Ok(StreamEvent::ToolCallDelta {
                        call_id,
                        delta: args.to_string(),
                    }));
                }
            }
        }

        events
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl Inference for OpenAiCompatProvider {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let body = self.build_chat_body(req, false);
        tracing::debug!(provider = %self.id, model = %body["model"], "chat request");

        let started = Instant::now();
        let resp_json = self.post_json("/chat/completions", &body).await?;
        let resp = parse_chat_response(&self.id, &resp_json)?;

        TraceEvent::LlmRequest {
            provider: self.id.clone(),
            model: resp.model.clone(),
            streaming: false,
            duration_ms: started.elapsed().as_millis() as u64,
            prompt_tokens: resp.usage.as_ref().map(|u| u.prompt_tokens),
            completion_tokens: resp.usage.as_ref().map(|u| u.completion_tokens),
        }
        .emit();
        Ok(resp)
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let body = self.build_chat_body(req, true);
        tracing::debug!(provider = %self.id, model = %body["model"], "stream request");

        let resp = self
            .authed_post("/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(http_status_error(&self.id, status, &err_text));
        }

        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(resp, move |data| state.parse(data)))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": [text],
        });
        let resp_json = self.post_json("/embeddings", &body).await?;
        parse_embedding(&self.id, &resp_json)
    }

    async fn image_from_prompt(&self, prompt: &str) -> Result<GeneratedImage> {
        let mut body = serde_json::json!({
            "model": self.image_model,
            "prompt": prompt,
            "n": 1,
        });
        // Only the dall-e family accepts `response_format`; newer image
        // models always answer with b64_json.
        if self.image_model.starts_with("dall-e") {
            body["response_format"] = Value::String("b64_json".into());
        }

        let resp_json = self.post_json("/images/generations", &body).await?;
        match parse_image_response(&self.id, &resp_json)? {
            ImagePayload::Inline(bytes) => Ok(GeneratedImage {
                bytes,
                content_type: "image/png".into(),
            }),
            ImagePayload::Url(url) => self.fetch_image_url(&url).await,
        }
    }

    async fn document_to_text(&self, bytes: &[u8], content_type: &str) -> Result<String> {
        if is_textual(content_type) {
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }

        let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
        let mime = content_type.split(';').next().unwrap_or("").trim();
        let part = if mime.starts_with("image/") {
            serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{mime};base64,{b64}")},
            })
        } else if mime == "application/pdf" {
            serde_json::json!({
                "type": "file",
                "file": {
                    "filename": "document.pdf",
                    "file_data": format!("data:application/pdf;base64,{b64}"),
                },
            })
        } else if let Ok(text) = std::str::from_utf8(bytes) {
            return Ok(text.to_string());
        } else {
            return Err(self.provider_error(format!(
                "cannot extract text from content type '{content_type}'"
            )));
        };

        tracing::debug!(provider = %self.id, content_type = %mime, size = bytes.len(), "document extraction");
        let resp_json = self
            .post_json("/chat/completions", &self.extraction_body(part))
            .await?;
        Ok(parse_chat_response(&self.id, &resp_json)?.content)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
