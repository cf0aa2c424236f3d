use std::sync::Arc;

use docent_domain::config::Config;
use docent_providers::Inference;
use docent_retrieval::RetrievalIndex;
use docent_tasks::TaskEngine;
use docent_tools::ObjectStore;

use crate::runtime::{Ingestor, SessionActor, SessionDirectory, SessionHandle, TurnDeps};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Collaborators**: config, inference, object store, retrieval
/// - **Sessions**: the actor directory and what each turn needs
/// - **Background work**: document ingestion and the task engine
#[derive(Clone)]
pub struct AppState {
    // ── Collaborators ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub inference: Arc<dyn Inference>,
    pub objects: Arc<dyn ObjectStore>,
    pub retrieval: Arc<RetrievalIndex>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub sessions: SessionDirectory,
    pub turn: Arc<TurnDeps>,

    // ── Background work ───────────────────────────────────────────────
    pub ingestor: Arc<Ingestor>,
    pub engine: TaskEngine,
}

impl AppState {
    /// The actor for `session_id`, started on first use.
    pub fn open_session(&self, session_id: &str) -> SessionHandle {
        self.sessions.get_or_spawn(session_id, || {
            SessionActor::spawn(session_id, self.turn.clone(), &self.config.sessions)
        })
    }
}
