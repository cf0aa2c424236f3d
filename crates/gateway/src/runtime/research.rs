//! The research pipeline run by the task engine:
//! `plan → fetch → synthesize → archive-and-notify`.
//!
//! Every step reads its inputs from the run params and earlier results,
//! so a resumed run rebuilds exactly the same context. Side effects
//! (page fetches, the archive write) are safe to repeat.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use docent_domain::config::{CapabilitiesConfig, TaskConfig};
use docent_domain::error::{Error, Result};
use docent_domain::tool::Message;
use docent_domain::trace::TraceEvent;
use docent_providers::{ChatRequest, Inference};
use docent_tasks::{Pipeline, Step, StepContext};
use docent_tools::html::truncate_chars;
use docent_tools::{Browser, ObjectStore};

use super::directory::SessionDirectory;

pub const PIPELINE_NAME: &str = "research";
pub const PLAN: &str = "plan";
pub const FETCH: &str = "fetch";
pub const SYNTHESIZE: &str = "synthesize";
pub const ARCHIVE_AND_NOTIFY: &str = "archive-and-notify";

/// Params recorded when a research run is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchParams {
    pub topic: String,
    pub source_session_id: String,
    #[serde(default)]
    pub connection_id: Option<String>,
}

impl ResearchParams {
    fn from_ctx(ctx: &StepContext) -> Result<Self> {
        serde_json::from_value(ctx.params.clone()).map_err(|e| Error::TaskStep {
            step: "params".into(),
            message: format!("invalid research params: {e}"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Source {
    query: String,
    text: String,
}

fn step_error(step: &str, message: impl Into<String>) -> Error {
    Error::TaskStep {
        step: step.into(),
        message: message.into(),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(ctx: &StepContext, step: &str, field: &str) -> Result<T> {
    let value = ctx.result(step)?.get(field).cloned().unwrap_or(Value::Null);
    serde_json::from_value(value)
        .map_err(|e| step_error(step, format!("unreadable '{field}' in logged result: {e}")))
}

/// Collaborators shared by the research steps.
pub struct ResearchDeps {
    pub inference: Arc<dyn Inference>,
    pub browser: Arc<dyn Browser>,
    pub objects: Arc<dyn ObjectStore>,
    pub sessions: SessionDirectory,
    pub capabilities: CapabilitiesConfig,
    pub max_sources: usize,
}

/// Build the research pipeline in its declared order.
pub fn research_pipeline(deps: Arc<ResearchDeps>) -> Result<Pipeline> {
    let steps: Vec<Arc<dyn Step>> = vec![
        Arc::new(PlanStep(deps.clone())) as Arc<dyn Step>,
        Arc::new(FetchStep(deps.clone())) as Arc<dyn Step>,
        Arc::new(SynthesizeStep(deps.clone())) as Arc<dyn Step>,
        Arc::new(ArchiveAndNotifyStep(deps)) as Arc<dyn Step>,
    ];
    Pipeline::new(PIPELINE_NAME, steps)
}

impl ResearchDeps {
    pub fn new(
        inference: Arc<dyn Inference>,
        browser: Arc<dyn Browser>,
        objects: Arc<dyn ObjectStore>,
        sessions: SessionDirectory,
        capabilities: CapabilitiesConfig,
        tasks: &TaskConfig,
    ) -> Self {
        Self {
            inference,
            browser,
            objects,
            sessions,
            capabilities,
            max_sources: tasks.max_sources.max(1),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct PlanStep(Arc<ResearchDeps>);

#[async_trait::async_trait]
impl Step for PlanStep {
    fn name(&self) -> &str {
        PLAN
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value> {
        let params = ResearchParams::from_ctx(ctx)?;
        let req = ChatRequest::new(vec![
            Message::system(format!(
                "You plan web research. Reply with at most {} search queries, one per \
                 line, and nothing else.",
                self.0.max_sources
            )),
            Message::user(params.topic.clone()),
        ]);
        let resp = self.0.inference.chat(&req).await?;
        let queries = parse_queries(&resp.content, &params.topic, self.0.max_sources);
        tracing::debug!(run_id = %ctx.run_id, queries = queries.len(), "research planned");
        Ok(json!({ "queries": queries }))
    }
}

/// One query per non-empty line, list markers stripped, deduplicated.
/// Falls back to the topic itself.
fn parse_queries(raw: &str, topic: &str, max: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for line in raw.lines() {
        let q = line
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*'))
            .trim()
            .trim_matches('"')
            .trim();
        if !q.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(q)) {
            out.push(q.to_string());
        }
        if out.len() == max {
            break;
        }
    }
    if out.is_empty() {
        out.push(topic.to_string());
    }
    out
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fetch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct FetchStep(Arc<ResearchDeps>);

#[async_trait::async_trait]
impl Step for FetchStep {
    fn name(&self) -> &str {
        FETCH
    }

    /// Fetches each planned query. Individual failures are skipped; the
    /// step fails (and is retried) only when nothing could be fetched.
    async fn execute(&self, ctx: &StepContext) -> Result<Value> {
        let queries: Vec<String> = decode(ctx, PLAN, "queries")?;
        let cfg = &self.0.capabilities;

        let mut sources = Vec::new();
        let mut failures = Vec::new();
        for query in &queries {
            let url = cfg.search_url_for(&urlencoding::encode(query));
            match self.0.browser.fetch_visible_text(&url).await {
                Ok(text) if !text.trim().is_empty() => sources.push(Source {
                    query: query.clone(),
                    text: truncate_chars(&text, cfg.max_page_chars),
                }),
                Ok(_) => failures.push(format!("{query}: empty page")),
                Err(e) => {
                    tracing::info!(run_id = %ctx.run_id, query = %query, error = %e, "research fetch failed");
                    failures.push(format!("{query}: {e}"));
                }
            }
        }

        if sources.is_empty() {
            return Err(step_error(
                FETCH,
                format!("no source could be fetched ({})", failures.join("; ")),
            ));
        }
        Ok(json!({ "sources": sources, "skipped": failures }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// synthesize
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct SynthesizeStep(Arc<ResearchDeps>);

#[async_trait::async_trait]
impl Step for SynthesizeStep {
    fn name(&self) -> &str {
        SYNTHESIZE
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value> {
        let params = ResearchParams::from_ctx(ctx)?;
        let sources: Vec<Source> = decode(ctx, FETCH, "sources")?;

        let mut material = String::new();
        for (i, s) in sources.iter().enumerate() {
            material.push_str(&format!("### Source {} (query: {})\n{}\n\n", i + 1, s.query, s.text));
        }

        let req = ChatRequest::new(vec![
            Message::system(
                "Write a concise research report in Markdown on the given topic, using \
                 only the supplied sources. Cite sources as [n].",
            ),
            Message::user(format!("Topic: {}\n\n{material}", params.topic)),
        ]);
        let resp = self.0.inference.chat(&req).await?;
        if resp.content.trim().is_empty() {
            return Err(step_error(SYNTHESIZE, "model returned an empty report"));
        }
        Ok(json!({ "report": resp.content }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// archive-and-notify
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ArchiveAndNotifyStep(Arc<ResearchDeps>);

pub fn archive_name(run_id: &str) -> String {
    format!("research/{run_id}.md")
}

#[async_trait::async_trait]
impl Step for ArchiveAndNotifyStep {
    fn name(&self) -> &str {
        ARCHIVE_AND_NOTIFY
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Value> {
        let params = ResearchParams::from_ctx(ctx)?;
        let report: String = decode(ctx, SYNTHESIZE, "report")?;

        let object = archive_name(&ctx.run_id);
        let document = format!("# {}\n\n{}\n", params.topic, report.trim());
        self.0
            .objects
            .put(&object, document.as_bytes(), "text/markdown")
            .await?;

        let message = format!(
            "Research on \"{}\" is complete (saved as \"{object}\").\n\n{}",
            params.topic,
            report.trim()
        );
        let connections = match self.0.sessions.resolve(&ctx.source_session_id) {
            Some(handle) => handle.notify(message).await.unwrap_or(0),
            None => 0,
        };
        if connections == 0 {
            tracing::info!(
                run_id = %ctx.run_id,
                session_id = %ctx.source_session_id,
                "session not connected, research notification dropped"
            );
        }
        TraceEvent::NotificationDelivered {
            session_id: ctx.source_session_id.clone(),
            connections,
        }
        .emit();

        Ok(json!({ "object": object, "delivered_to": connections }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_strip_list_markers_and_dedupe() {
        let raw = "1. rust async runtimes\n- Tokio internals\n\n* \"tokio internals\"\n2) io_uring";
        assert_eq!(
            parse_queries(raw, "topic", 5),
            vec!["rust async runtimes", "Tokio internals", "io_uring"]
        );
    }

    #[test]
    fn queries_are_capped() {
        assert_eq!(parse_queries("a\nb\nc", "t", 2), vec!["a", "b"]);
    }

    #[test]
    fn empty_plan_falls_back_to_topic() {
        assert_eq!(parse_queries("  \n", "quantum dots", 3), vec!["quantum dots"]);
    }

    #[test]
    fn archive_names_are_per_run() {
        assert_eq!(archive_name("abc"), "research/abc.md");
    }
}
