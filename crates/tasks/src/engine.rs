//! Executes a [`Pipeline`] against a [`StepLog`] with memoized resume and
//! bounded per-step retry.

use crate::log::StepLog;
use crate::pipeline::{Pipeline, StepContext};
use crate::run::{RunStatus, StepRecord, TaskRun};
use chrono::Utc;
use docent_domain::config::TaskConfig;
use docent_domain::error::{Error, Result};
use docent_domain::trace::TraceEvent;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Fire-and-forget entry point used by callers that only need a run id.
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    /// Durably record a new run and start it in the background.
    /// Returns as soon as the run is recorded.
    async fn schedule(&self, source_session_id: &str, params: serde_json::Value)
        -> Result<String>;
}

struct EngineInner {
    log: Arc<dyn StepLog>,
    pipeline: Arc<Pipeline>,
    cfg: TaskConfig,
    /// Run ids currently executing in this process.
    active: Mutex<HashSet<String>>,
}

/// Cheap to clone; clones share the same log and active set.
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

/// Removes a run id from the active set when dropped, including on panic.
struct ActiveGuard<'a> {
    active: &'a Mutex<HashSet<String>>,
    run_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.lock().remove(&self.run_id);
    }
}

impl TaskEngine {
    pub fn new(log: Arc<dyn StepLog>, pipeline: Arc<Pipeline>, cfg: TaskConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                log,
                pipeline,
                cfg,
                active: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// The run as reconstructed from the log.
    pub async fn get(&self, run_id: &str) -> Result<Option<TaskRun>> {
        self.inner.log.load(run_id).await
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.inner.active.lock().contains(run_id)
    }

    /// Execute (or resume) a run to completion.
    ///
    /// Steps already in the log are skipped and their results reused. A
    /// failing step is retried with exponential backoff up to
    /// `max_attempts`; exhaustion marks the run `failed` and no later step
    /// executes. If this process is already executing `run_id`, returns
    /// `Running` immediately.
    pub async fn run(&self, run_id: &str) -> Result<RunStatus> {
        let inner = &self.inner;
        let _guard = {
            let mut active = inner.active.lock();
            if !active.insert(run_id.to_string()) {
                tracing::debug!(run_id = %run_id, "run already executing, skipping re-entry");
                return Ok(RunStatus::Running);
            }
            ActiveGuard { active: &inner.active, run_id: run_id.to_string() }
        };

        let run = inner
            .log
            .load(run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task run '{run_id}'")))?;
        if run.status.is_terminal() {
            return Ok(run.status);
        }

        let mut results: BTreeMap<String, serde_json::Value> = BTreeMap::new();

        for step in inner.pipeline.steps() {
            let name = step.name();

            if let Some(record) = run.completed(name) {
                tracing::debug!(run_id = %run_id, step = %name, "reusing logged step result");
                TraceEvent::TaskStepCompleted {
                    run_id: run_id.to_string(),
                    step: name.to_string(),
                    attempt: record.attempt,
                    reused: true,
                }
                .emit();
                results.insert(name.to_string(), record.result.clone());
                continue;
            }

            let max_attempts = inner.cfg.attempts();
            let mut attempt = 1;
            let value = loop {
                let ctx = StepContext {
                    run_id: run.id.clone(),
                    source_session_id: run.source_session_id.clone(),
                    params: run.params.clone(),
                    results: results.clone(),
                    attempt,
                };

                let span = tracing::info_span!("task_step", run_id = %run_id, step = %name, attempt);
                let outcome = tracing::Instrument::instrument(
                    AssertUnwindSafe(step.execute(&ctx)).catch_unwind(),
                    span,
                )
                .await;

                let err = match outcome {
                    Ok(Ok(value)) => break value,
                    Ok(Err(e)) => e,
                    Err(_) => Error::Other("step panicked".into()),
                };
                let err = Error::TaskStep { step: name.to_string(), message: err.to_string() };

                if attempt >= max_attempts {
                    tracing::warn!(run_id = %run_id, step = %name, attempt, error = %err, "step failed, retries exhausted");
                    inner
                        .log
                        .set_status(run_id, RunStatus::Failed, Some(err.to_string()))
                        .await?;
                    TraceEvent::TaskRunFinished {
                        run_id: run_id.to_string(),
                        status: RunStatus::Failed.as_str().into(),
                    }
                    .emit();
                    return Ok(RunStatus::Failed);
                }

                let delay = inner.cfg.backoff(attempt);
                tracing::info!(
                    run_id = %run_id,
                    step = %name,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "step failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            };

            let record = StepRecord {
                name: name.to_string(),
                result: value.clone(),
                completed_at: Utc::now(),
                attempt,
            };
            inner.log.append_step(run_id, &record).await?;
            TraceEvent::TaskStepCompleted {
                run_id: run_id.to_string(),
                step: name.to_string(),
                attempt,
                reused: false,
            }
            .emit();
            results.insert(name.to_string(), value);
        }

        inner.log.set_status(run_id, RunStatus::Done, None).await?;
        TraceEvent::TaskRunFinished {
            run_id: run_id.to_string(),
            status: RunStatus::Done.as_str().into(),
        }
        .emit();
        Ok(RunStatus::Done)
    }

    /// Start `run` for `run_id` on its own task.
    pub fn spawn(&self, run_id: String) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let span = tracing::info_span!(
            "task_run",
            run_id = %run_id,
            pipeline = %self.inner.pipeline.name()
        );
        tokio::spawn(tracing::Instrument::instrument(
            async move {
                match engine.run(&run_id).await {
                    Ok(status) => tracing::info!(run_id = %run_id, status = status.as_str(), "task run ended"),
                    Err(e) => tracing::error!(run_id = %run_id, error = %e, "task run aborted"),
                }
            },
            span,
        ))
    }

    /// Re-enter every run the log still shows as `running`. Call once at
    /// startup. Returns the resumed ids.
    pub async fn resume_unfinished(&self) -> Result<Vec<String>> {
        let runs = self.inner.log.list().await?;
        let mut resumed = Vec::new();
        for run in runs.into_iter().filter(|r| !r.status.is_terminal()) {
            tracing::info!(
                run_id = %run.id,
                completed_steps = run.steps.len(),
                "resuming unfinished task run"
            );
            self.spawn(run.id.clone());
            resumed.push(run.id);
        }
        Ok(resumed)
    }
}

#[async_trait::async_trait]
impl Scheduler for TaskEngine {
    async fn schedule(
        &self,
        source_session_id: &str,
        params: serde_json::Value,
    ) -> Result<String> {
        let run = TaskRun::new(uuid::Uuid::new_v4().to_string(), source_session_id, params);
        self.inner.log.create(&run).await?;
        tracing::info!(
            run_id = %run.id,
            session_id = %source_session_id,
            pipeline = %self.inner.pipeline.name(),
            "task run scheduled"
        );
        self.spawn(run.id.clone());
        Ok(run.id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::JsonlStepLog;
    use crate::pipeline::Step;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Counts executions and fails the first `fail_first` of them.
    struct Counting {
        name: &'static str,
        calls: AtomicU32,
        fail_first: u32,
    }

    impl Counting {
        fn new(name: &'static str, fail_first: u32) -> Arc<Self> {
            Arc::new(Self { name, calls: AtomicU32::new(0), fail_first })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Step for Counting {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(&self, ctx: &StepContext) -> Result<serde_json::Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(Error::Http(format!("{} flaked", self.name)));
            }
            Ok(serde_json::json!({
                "step": self.name,
                "seen": ctx.results.keys().cloned().collect::<Vec<_>>(),
            }))
        }
    }

    fn fast_cfg(max_attempts: u32) -> TaskConfig {
        TaskConfig {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..TaskConfig::default()
        }
    }

    fn engine(
        dir: &std::path::Path,
        steps: Vec<Arc<dyn Step>>,
        cfg: TaskConfig,
    ) -> (Arc<JsonlStepLog>, TaskEngine) {
        let log = Arc::new(JsonlStepLog::new(dir).unwrap());
        let pipeline = Arc::new(Pipeline::new("test", steps).unwrap());
        let engine = TaskEngine::new(log.clone(), pipeline, cfg);
        (log, engine)
    }

    #[tokio::test]
    async fn runs_all_steps_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = Counting::new("a", 0);
        let b = Counting::new("b", 0);
        let (log, engine) = engine(dir.path(), vec![a.clone(), b.clone()], fast_cfg(3));

        log.create(&TaskRun::new("r1", "s", serde_json::Value::Null)).await.unwrap();
        assert_eq!(engine.run("r1").await.unwrap(), RunStatus::Done);

        let run = engine.get("r1").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Done);
        let names: Vec<_> = run.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(run.steps[1].result["seen"], serde_json::json!(["a"]));
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let flaky = Counting::new("flaky", 2);
        let (log, engine) = engine(dir.path(), vec![flaky.clone()], fast_cfg(3));

        log.create(&TaskRun::new("r", "s", serde_json::Value::Null)).await.unwrap();
        assert_eq!(engine.run("r").await.unwrap(), RunStatus::Done);
        assert_eq!(flaky.calls(), 3);
        let run = engine.get("r").await.unwrap().unwrap();
        assert_eq!(run.steps[0].attempt, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_run_and_stop() {
        let dir = tempfile::tempdir().unwrap();
        let broken = Counting::new("broken", u32::MAX);
        let after = Counting::new("after", 0);
        let (log, engine) = engine(dir.path(), vec![broken.clone(), after.clone()], fast_cfg(2));

        log.create(&TaskRun::new("r", "s", serde_json::Value::Null)).await.unwrap();
        assert_eq!(engine.run("r").await.unwrap(), RunStatus::Failed);
        assert_eq!(broken.calls(), 2);
        assert_eq!(after.calls(), 0);

        let run = engine.get("r").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.unwrap().contains("broken"));

        // A terminal run is not executed again.
        assert_eq!(engine.run("r").await.unwrap(), RunStatus::Failed);
        assert_eq!(broken.calls(), 2);
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (_log, engine) = engine(dir.path(), vec![Counting::new("a", 0)], fast_cfg(1));
        assert!(matches!(engine.run("missing").await, Err(Error::NotFound(_))));
        assert!(!engine.is_active("missing"));
    }

    struct Panics;

    #[async_trait::async_trait]
    impl Step for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _ctx: &StepContext) -> Result<serde_json::Value> {
            panic!("step bug");
        }
    }

    #[tokio::test]
    async fn panicking_step_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (log, engine) = engine(dir.path(), vec![Arc::new(Panics)], fast_cfg(1));
        log.create(&TaskRun::new("r", "s", serde_json::Value::Null)).await.unwrap();
        assert_eq!(engine.run("r").await.unwrap(), RunStatus::Failed);
        assert!(!engine.is_active("r"));
    }
}
