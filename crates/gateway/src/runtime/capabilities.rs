//! Capability registry: the fixed set of actions the model may invoke.
//!
//! Each [`Capability`] carries its own description, JSON schema and typed
//! argument struct. [`CapabilityRegistry::dispatch`] is the only entry
//! point; it validates arguments, runs the handler, and turns every
//! failure (including a panic) into text for the model.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::Instrument;

use docent_domain::config::CapabilitiesConfig;
use docent_domain::error::{Error, Result};
use docent_domain::tool::{Message, ToolDefinition};
use docent_domain::trace::TraceEvent;
use docent_providers::traits::is_textual;
use docent_providers::{ChatRequest, Inference};
use docent_tasks::Scheduler;
use docent_tools::html::truncate_chars;
use docent_tools::{Browser, ObjectStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability kinds
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    WebSearch,
    GenerateImage,
    ReadFile,
    StartResearch,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::WebSearch,
        Capability::GenerateImage,
        Capability::ReadFile,
        Capability::StartResearch,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::WebSearch => "web_search",
            Capability::GenerateImage => "generate_image",
            Capability::ReadFile => "read_file",
            Capability::StartResearch => "start_research",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            Capability::WebSearch => {
                "Search the web and return the visible text of the results page."
            }
            Capability::GenerateImage => {
                "Generate an image from a text prompt. The image is stored and a \
                 reference to it is returned."
            }
            Capability::ReadFile => {
                "Read a previously uploaded document by its exact name."
            }
            Capability::StartResearch => {
                "Start a long-running research job on a topic. Returns immediately; \
                 the report is delivered to this conversation when it is ready."
            }
        }
    }

    fn input_schema(self) -> Value {
        match self {
            Capability::WebSearch => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query." }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
            Capability::GenerateImage => json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string", "description": "What to draw." }
                },
                "required": ["prompt"],
                "additionalProperties": false
            }),
            Capability::ReadFile => json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Exact document name." }
                },
                "required": ["name"],
                "additionalProperties": false
            }),
            Capability::StartResearch => json!({
                "type": "object",
                "properties": {
                    "topic": { "type": "string", "description": "Research topic." }
                },
                "required": ["topic"],
                "additionalProperties": false
            }),
        }
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema(),
        }
    }
}

// ── Argument shapes ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WebSearchArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GenerateImageArgs {
    prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReadFileArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StartResearchArgs {
    topic: String,
}

fn parse_args<T: DeserializeOwned>(cap: Capability, args: &Value) -> Result<T> {
    // Models sometimes send `null` for an empty argument object.
    let args = if args.is_null() { json!({}) } else { args.clone() };
    serde_json::from_value(args).map_err(|e| Error::Capability {
        name: cap.name().into(),
        message: format!("invalid arguments: {e}"),
    })
}

fn require_non_empty(cap: Capability, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Capability {
            name: cap.name().into(),
            message: format!("'{field}' must not be empty"),
        });
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who is asking. Passed to handlers that need to route results back.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub session_id: String,
    pub connection_id: String,
}

/// Text fed back to the model for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityResult {
    pub content: String,
    pub is_error: bool,
}

pub struct CapabilityRegistry {
    inference: Arc<dyn Inference>,
    browser: Arc<dyn Browser>,
    objects: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn Scheduler>,
    cfg: CapabilitiesConfig,
}

impl CapabilityRegistry {
    pub fn new(
        inference: Arc<dyn Inference>,
        browser: Arc<dyn Browser>,
        objects: Arc<dyn ObjectStore>,
        scheduler: Arc<dyn Scheduler>,
        cfg: CapabilitiesConfig,
    ) -> Self {
        Self {
            inference,
            browser,
            objects,
            scheduler,
            cfg,
        }
    }

    /// Definitions advertised to the model on every request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        Capability::ALL.iter().map(|c| c.definition()).collect()
    }

    /// Run one call. Never fails: unknown names, bad arguments, handler
    /// errors and panics all come back as an `is_error` result.
    pub async fn dispatch(&self, name: &str, args: &Value, ctx: &CallContext) -> CapabilityResult {
        let span = tracing::info_span!(
            "capability.call",
            capability = %name,
            session_id = %ctx.session_id,
        );
        async {
            let start = Instant::now();
            let outcome = match Capability::from_name(name) {
                None => Err(Error::Capability {
                    name: name.into(),
                    message: "unknown capability".into(),
                }),
                Some(cap) => {
                    match AssertUnwindSafe(self.invoke(cap, args, ctx)).catch_unwind().await {
                        Ok(res) => res,
                        Err(_) => Err(Error::Capability {
                            name: name.into(),
                            message: "handler panicked".into(),
                        }),
                    }
                }
            };

            let result = match outcome {
                Ok(content) => CapabilityResult { content, is_error: false },
                Err(e) => {
                    tracing::warn!(capability = %name, error = %e, "capability failed");
                    CapabilityResult {
                        content: format!("error: {e}"),
                        is_error: true,
                    }
                }
            };

            TraceEvent::CapabilityInvoked {
                name: name.to_string(),
                duration_ms: start.elapsed().as_millis() as u64,
                is_error: result.is_error,
            }
            .emit();
            result
        }
        .instrument(span)
        .await
    }

    async fn invoke(&self, cap: Capability, args: &Value, ctx: &CallContext) -> Result<String> {
        match cap {
            Capability::WebSearch => {
                let a: WebSearchArgs = parse_args(cap, args)?;
                require_non_empty(cap, "query", &a.query)?;
                Ok(self.web_search(&a.query).await)
            }
            Capability::GenerateImage => {
                let a: GenerateImageArgs = parse_args(cap, args)?;
                require_non_empty(cap, "prompt", &a.prompt)?;
                self.generate_image(&a.prompt).await
            }
            Capability::ReadFile => {
                let a: ReadFileArgs = parse_args(cap, args)?;
                require_non_empty(cap, "name", &a.name)?;
                self.read_file(&a.name).await
            }
            Capability::StartResearch => {
                let a: StartResearchArgs = parse_args(cap, args)?;
                require_non_empty(cap, "topic", &a.topic)?;
                self.start_research(&a.topic, ctx).await
            }
        }
    }

    // ── Handlers ─────────────────────────────────────────────────────

    /// Navigation failures come back as text so the model can carry on.
    async fn web_search(&self, query: &str) -> String {
        let url = self.cfg.search_url_for(&urlencoding::encode(query));
        match self.browser.fetch_visible_text(&url).await {
            Ok(text) => truncate_chars(&text, self.cfg.max_page_chars),
            Err(e) => {
                tracing::info!(url = %url, error = %e, "web search fetch failed");
                format!("web search failed: {e}")
            }
        }
    }

    async fn generate_image(&self, prompt: &str) -> Result<String> {
        let prompt = if self.cfg.rewrite_image_prompts {
            self.rewrite_image_prompt(prompt).await
        } else {
            prompt.to_string()
        };

        let image = self.inference.image_from_prompt(&prompt).await?;
        let name = format!(
            "images/{}.{}",
            uuid::Uuid::new_v4(),
            extension_for(&image.content_type)
        );
        self.objects
            .put(&name, &image.bytes, &image.content_type)
            .await?;
        tracing::info!(object = %name, bytes = image.bytes.len(), "generated image stored");

        Ok(format!(
            "Image generated and stored as \"{name}\" ({}, {} bytes).",
            image.content_type,
            image.bytes.len()
        ))
    }

    /// One chat call that turns a terse request into a detailed image
    /// prompt. Falls back to the original on any failure.
    async fn rewrite_image_prompt(&self, prompt: &str) -> String {
        let req = ChatRequest::new(vec![
            Message::system(
                "Rewrite the user's request as a single detailed prompt for an image \
                 generation model. Reply with the prompt only.",
            ),
            Message::user(prompt),
        ]);
        match self.inference.chat(&req).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content.trim().to_string(),
            Ok(_) => prompt.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "image prompt rewrite failed, using original");
                prompt.to_string()
            }
        }
    }

    async fn read_file(&self, name: &str) -> Result<String> {
        let Some(obj) = self.objects.get(name).await? else {
            return Ok(format!("not found: no document named \"{name}\""));
        };
        let text = if is_textual(&obj.content_type) {
            String::from_utf8_lossy(&obj.bytes).into_owned()
        } else {
            self.inference
                .document_to_text(&obj.bytes, &obj.content_type)
                .await?
        };
        Ok(truncate_chars(&text, self.cfg.max_file_chars))
    }

    async fn start_research(&self, topic: &str, ctx: &CallContext) -> Result<String> {
        let params = json!({
            "topic": topic,
            "source_session_id": ctx.session_id,
            "connection_id": ctx.connection_id,
        });
        let run_id = self.scheduler.schedule(&ctx.session_id, params).await?;
        Ok(format!(
            "Research on \"{topic}\" has started (run id: {run_id}). The report will be \
             posted to this conversation when it is ready."
        ))
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(Capability::from_name(cap.name()), Some(cap));
        }
        assert_eq!(Capability::from_name("exec"), None);
    }

    #[test]
    fn schemas_require_their_single_field() {
        for cap in Capability::ALL {
            let def = cap.definition();
            let required = def.parameters["required"].as_array().unwrap();
            assert_eq!(required.len(), 1, "{}", def.name);
            assert_eq!(def.parameters["additionalProperties"], false);
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_args::<WebSearchArgs>(
            Capability::WebSearch,
            &json!({"query": "rust", "limit": 3}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid arguments"));
    }

    #[test]
    fn null_args_report_the_missing_field() {
        let err = parse_args::<ReadFileArgs>(Capability::ReadFile, &Value::Null).unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn image_extensions() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("application/octet-stream"), "png");
    }
}
