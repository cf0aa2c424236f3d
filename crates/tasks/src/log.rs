//! Durable step logs.

use crate::run::{LogEntry, RunStatus, StepRecord, TaskRun};
use chrono::Utc;
use docent_domain::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Persistent record of each run's progress. The log, not memory, is what
/// a run resumes from.
#[async_trait::async_trait]
pub trait StepLog: Send + Sync {
    /// Record a new run. Fails if the id already exists.
    async fn create(&self, run: &TaskRun) -> Result<()>;

    async fn append_step(&self, run_id: &str, record: &StepRecord) -> Result<()>;

    async fn set_status(&self, run_id: &str, status: RunStatus, error: Option<String>)
        -> Result<()>;

    async fn load(&self, run_id: &str) -> Result<Option<TaskRun>>;

    /// Every run in the log, oldest first.
    async fn list(&self) -> Result<Vec<TaskRun>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One append-only `<run_id>.jsonl` file per run.
///
/// Each append is a single `write` of one line followed by `sync_data`.
/// A line cut short by a crash fails to parse and is skipped on replay,
/// which is equivalent to the append never having happened.
pub struct JsonlStepLog {
    dir: PathBuf,
    append_lock: tokio::sync::Mutex<()>,
}

impl JsonlStepLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, append_lock: tokio::sync::Mutex::new(()) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        let valid = !run_id.is_empty()
            && run_id.len() <= 128
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(Error::NotFound(format!("invalid run id '{run_id}'")));
        }
        Ok(self.dir.join(format!("{run_id}.jsonl")))
    }

    async fn append(&self, path: &Path, entry: &LogEntry, create_new: bool) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        let mut opts = tokio::fs::OpenOptions::new();
        opts.read(true).append(true);
        if create_new {
            opts.create_new(true);
        }
        let mut file = opts.open(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("no step log at {}", path.display()))
            }
            std::io::ErrorKind::AlreadyExists => {
                Error::Store(format!("step log {} already exists", path.display()))
            }
            _ => Error::Io(e),
        })?;

        // Terminate a line left partial by an earlier crash so this entry
        // starts on its own line.
        if file.metadata().await?.len() > 0 {
            file.seek(std::io::SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                line.insert(0, '\n');
            }
        }
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn read_run(path: &Path) -> Result<Option<TaskRun>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entries = raw.lines().filter(|l| !l.trim().is_empty()).filter_map(|line| {
            match serde_json::from_str::<LogEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable step log line");
                    None
                }
            }
        });
        Ok(TaskRun::replay(entries))
    }
}

#[async_trait::async_trait]
impl StepLog for JsonlStepLog {
    async fn create(&self, run: &TaskRun) -> Result<()> {
        let path = self.path_for(&run.id)?;
        let entry = LogEntry::Created {
            run_id: run.id.clone(),
            source_session_id: run.source_session_id.clone(),
            params: run.params.clone(),
            at: run.created_at,
        };
        self.append(&path, &entry, true).await
    }

    async fn append_step(&self, run_id: &str, record: &StepRecord) -> Result<()> {
        let path = self.path_for(run_id)?;
        self.append(&path, &LogEntry::Step { record: record.clone() }, false).await
    }

    async fn set_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<()> {
        let path = self.path_for(run_id)?;
        self.append(&path, &LogEntry::Status { status, error, at: Utc::now() }, false)
            .await
    }

    async fn load(&self, run_id: &str) -> Result<Option<TaskRun>> {
        match self.path_for(run_id) {
            Ok(path) => Self::read_run(&path).await,
            Err(_) => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<TaskRun>> {
        let mut runs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(run) = Self::read_run(&path).await? {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }
}
