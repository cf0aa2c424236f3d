use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Records
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One successful step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub result: serde_json::Value,
    pub completed_at: DateTime<Utc>,
    /// Attempt that succeeded (1-based).
    #[serde(default = "d_attempt")]
    pub attempt: u32,
}

fn d_attempt() -> u32 {
    1
}

/// A run reconstructed from its step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub source_session_id: String,
    pub params: serde_json::Value,
    pub steps: Vec<StepRecord>,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRun {
    pub fn new(
        id: impl Into<String>,
        source_session_id: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source_session_id: source_session_id.into(),
            params,
            steps: Vec::new(),
            status: RunStatus::Running,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The logged record for `step`, if it already completed.
    pub fn completed(&self, step: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|r| r.name == step)
    }

    /// Rebuild a run from log entries in file order.
    ///
    /// Returns `None` without a `Created` entry. A repeated step name keeps
    /// its first record.
    pub fn replay<I>(entries: I) -> Option<Self>
    where
        I: IntoIterator<Item = LogEntry>,
    {
        let mut run: Option<TaskRun> = None;
        for entry in entries {
            match entry {
                LogEntry::Created { run_id, source_session_id, params, at } => {
                    let mut created = TaskRun::new(run_id, source_session_id, params);
                    created.created_at = at;
                    created.updated_at = at;
                    run = Some(created);
                }
                LogEntry::Step { record } => {
                    if let Some(r) = run.as_mut() {
                        if r.completed(&record.name).is_none() {
                            r.updated_at = record.completed_at;
                            r.steps.push(record);
                        }
                    }
                }
                LogEntry::Status { status, error, at } => {
                    if let Some(r) = run.as_mut() {
                        r.status = status;
                        r.error = error;
                        r.updated_at = at;
                    }
                }
            }
        }
        run
    }
}

/// One line of a run's step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    Created {
        run_id: String,
        source_session_id: String,
        params: serde_json::Value,
        at: DateTime<Utc>,
    },
    Step {
        record: StepRecord,
    },
    Status {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },
}
