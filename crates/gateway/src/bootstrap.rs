//! AppState construction shared by `serve`, `run` and `ingest`.
//!
//! [`build_app_state`] creates the real collaborators from config;
//! [`assemble`] wires any set of collaborators together, which is what
//! the integration tests use with in-process doubles.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use docent_domain::config::{Config, ConfigSeverity};
use docent_providers::Inference;
use docent_retrieval::{InMemoryVectorIndex, RetrievalIndex, VectorIndex};
use docent_tasks::{JsonlStepLog, Scheduler, StepLog, TaskEngine};
use docent_tools::{Browser, FsObjectStore, HttpBrowser, ObjectStore};

use crate::runtime::research::{research_pipeline, ResearchDeps};
use crate::runtime::{CapabilityRegistry, Ingestor, SessionDirectory, TurnDeps};
use crate::state::AppState;

/// The external services the core talks to.
pub struct Collaborators {
    pub inference: Arc<dyn Inference>,
    pub browser: Arc<dyn Browser>,
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn VectorIndex>,
    pub step_log: Arc<dyn StepLog>,
}

/// Validate config and build every collaborator from it.
///
/// `require_key` makes a missing inference API key fatal; `serve` passes
/// `false` so the process still comes up and reports the problem.
pub async fn build_app_state(config: Arc<Config>, require_key: bool) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Inference ────────────────────────────────────────────────────
    let inference = docent_providers::create_provider(&config.llm, require_key)
        .context("initializing inference provider")?;
    tracing::info!(
        provider = %config.llm.provider_id,
        base_url = %config.llm.base_url,
        chat_model = %config.llm.chat_model,
        "inference provider ready"
    );

    // ── Object store ─────────────────────────────────────────────────
    let objects_dir = config.storage.objects_dir();
    let objects: Arc<dyn ObjectStore> = Arc::new(
        FsObjectStore::new(&objects_dir).context("initializing object store")?,
    );
    tracing::info!(path = %objects_dir.display(), "object store ready");

    // ── Vector index ─────────────────────────────────────────────────
    let index: Arc<dyn VectorIndex> = match &config.retrieval.index_path {
        Some(path) => {
            let path = config.storage.resolve(path);
            let idx = InMemoryVectorIndex::open(&path)
                .with_context(|| format!("loading vector index snapshot {}", path.display()))?;
            tracing::info!(path = %path.display(), entries = idx.len(), "vector index loaded");
            Arc::new(idx)
        }
        None => {
            tracing::info!("vector index is in-memory only (no retrieval.index_path)");
            Arc::new(InMemoryVectorIndex::new())
        }
    };

    // ── Browser ──────────────────────────────────────────────────────
    let browser: Arc<dyn Browser> = Arc::new(
        HttpBrowser::new(Duration::from_secs(config.capabilities.fetch_timeout_secs))
            .context("initializing browser")?,
    );

    // ── Step log ─────────────────────────────────────────────────────
    let runs_dir = config.storage.runs_dir();
    let step_log: Arc<dyn StepLog> =
        Arc::new(JsonlStepLog::new(&runs_dir).context("initializing step log")?);
    tracing::info!(path = %runs_dir.display(), "step log ready");

    assemble(
        config,
        Collaborators {
            inference,
            browser,
            objects,
            index,
            step_log,
        },
    )
}

/// Wire collaborators into a ready [`AppState`]. Does not start any
/// background work; see [`resume_runs`].
pub fn assemble(config: Arc<Config>, c: Collaborators) -> anyhow::Result<AppState> {
    let retrieval = Arc::new(RetrievalIndex::new(
        c.inference.clone(),
        c.index,
        config.retrieval.max_chunks_per_call,
    ));

    let sessions = SessionDirectory::new();

    let research = Arc::new(ResearchDeps::new(
        c.inference.clone(),
        c.browser.clone(),
        c.objects.clone(),
        sessions.clone(),
        config.capabilities.clone(),
        &config.tasks,
    ));
    let pipeline = research_pipeline(research).context("building research pipeline")?;
    let engine = TaskEngine::new(c.step_log, Arc::new(pipeline), config.tasks.clone());
    tracing::info!(pipeline = ?engine.pipeline(), "task engine ready");

    let capabilities = Arc::new(CapabilityRegistry::new(
        c.inference.clone(),
        c.browser,
        c.objects.clone(),
        Arc::new(engine.clone()) as Arc<dyn Scheduler>,
        config.capabilities.clone(),
    ));

    let turn = Arc::new(TurnDeps {
        inference: c.inference.clone(),
        retrieval: retrieval.clone(),
        capabilities,
        turn: config.turn.clone(),
        top_k: config.retrieval.top_k,
        temperature: config.llm.temperature,
    });

    let ingestor = Arc::new(Ingestor::new(
        c.inference.clone(),
        c.objects.clone(),
        retrieval.clone(),
        &config.retrieval,
    ));

    Ok(AppState {
        config,
        inference: c.inference,
        objects: c.objects,
        retrieval,
        sessions,
        turn,
        ingestor,
        engine,
    })
}

/// Re-enter every task run left unfinished by a previous process.
pub async fn resume_runs(state: &AppState) -> anyhow::Result<()> {
    let resumed = state
        .engine
        .resume_unfinished()
        .await
        .context("scanning step log for unfinished runs")?;
    if resumed.is_empty() {
        tracing::info!("no unfinished task runs");
    } else {
        tracing::info!(count = resumed.len(), "resumed unfinished task runs");
    }
    Ok(())
}
