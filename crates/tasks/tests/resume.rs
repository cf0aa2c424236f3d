use chrono::Utc;
use docent_domain::config::TaskConfig;
use docent_domain::error::Result;
use docent_tasks::{
    JsonlStepLog, Pipeline, RunStatus, Scheduler, Step, StepContext, StepLog, StepRecord,
    TaskEngine, TaskRun,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Recorder {
    name: &'static str,
    calls: AtomicU32,
}

impl Recorder {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self { name, calls: AtomicU32::new(0) })
    }
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Step for Recorder {
    fn name(&self) -> &str {
        self.name
    }
    async fn execute(&self, ctx: &StepContext) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let upstream: Vec<Value> = ctx.results.values().cloned().collect();
        Ok(json!({ "by": self.name, "upstream": upstream }))
    }
}

/// Blocks until released, then succeeds.
struct Gate {
    release: Arc<Notify>,
    calls: AtomicU32,
}

#[async_trait::async_trait]
impl Step for Gate {
    fn name(&self) -> &str {
        "gate"
    }
    async fn execute(&self, _ctx: &StepContext) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(Value::Null)
    }
}

fn cfg() -> TaskConfig {
    TaskConfig { max_attempts: 2, initial_backoff_ms: 1, max_backoff_ms: 1, ..TaskConfig::default() }
}

fn logged(name: &str, result: Value) -> StepRecord {
    StepRecord { name: name.into(), result, completed_at: Utc::now(), attempt: 1 }
}

async fn wait_for_status(engine: &TaskEngine, run_id: &str, status: RunStatus) -> TaskRun {
    for _ in 0..200 {
        if let Some(run) = engine.get(run_id).await.unwrap() {
            if run.status == status {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached {status:?}");
}

#[tokio::test]
async fn resume_executes_only_the_missing_steps() {
    let dir = tempfile::tempdir().unwrap();
    let plan = Recorder::new("plan");
    let fetch = Recorder::new("fetch");
    let synthesize = Recorder::new("synthesize");
    let archive = Recorder::new("archive-and-notify");

    let log = Arc::new(JsonlStepLog::new(dir.path()).unwrap());
    let steps: Vec<Arc<dyn Step>> =
        vec![plan.clone(), fetch.clone(), synthesize.clone(), archive.clone()];
    let engine = TaskEngine::new(log.clone(), Arc::new(Pipeline::new("research", steps).unwrap()), cfg());

    log.create(&TaskRun::new("run-7", "session-1", json!({"topic": "actors"}))).await.unwrap();
    log.append_step("run-7", &logged("plan", json!({"queries": ["a"]}))).await.unwrap();
    log.append_step("run-7", &logged("fetch", json!({"pages": 2}))).await.unwrap();

    assert_eq!(engine.run("run-7").await.unwrap(), RunStatus::Done);

    assert_eq!(plan.calls(), 0);
    assert_eq!(fetch.calls(), 0);
    assert_eq!(synthesize.calls(), 1);
    assert_eq!(archive.calls(), 1);

    let run = engine.get("run-7").await.unwrap().unwrap();
    let names: Vec<_> = run.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["plan", "fetch", "synthesize", "archive-and-notify"]);
    // The resumed step saw the logged results.
    assert_eq!(run.steps[2].result["upstream"][1]["pages"], 2);
}

#[tokio::test]
async fn schedule_returns_before_steps_finish() {
    let dir = tempfile::tempdir().unwrap();
    let release = Arc::new(Notify::new());
    let gate = Arc::new(Gate { release: release.clone(), calls: AtomicU32::new(0) });
    let log = Arc::new(JsonlStepLog::new(dir.path()).unwrap());
    let engine = TaskEngine::new(log, Arc::new(Pipeline::new("p", vec![gate.clone() as Arc<dyn Step>]).unwrap()), cfg());

    let run_id = engine.schedule("session-1", json!({"topic": "x"})).await.unwrap();

    let run = engine.get(&run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.source_session_id, "session-1");

    // Let the background run through.
    for _ in 0..100 {
        if gate.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    release.notify_one();
    wait_for_status(&engine, &run_id, RunStatus::Done).await;
}

#[tokio::test]
async fn concurrent_entry_for_the_same_run_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let release = Arc::new(Notify::new());
    let gate = Arc::new(Gate { release: release.clone(), calls: AtomicU32::new(0) });
    let log = Arc::new(JsonlStepLog::new(dir.path()).unwrap());
    let engine = TaskEngine::new(log.clone(), Arc::new(Pipeline::new("p", vec![gate.clone() as Arc<dyn Step>]).unwrap()), cfg());

    log.create(&TaskRun::new("r", "s", Value::Null)).await.unwrap();
    let first = engine.spawn("r".into());
    for _ in 0..100 {
        if engine.is_active("r") && gate.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Second entry returns immediately without executing the step again.
    assert_eq!(engine.run("r").await.unwrap(), RunStatus::Running);
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);

    release.notify_one();
    first.await.unwrap();
    assert_eq!(engine.get("r").await.unwrap().unwrap().status, RunStatus::Done);
}

#[tokio::test]
async fn resume_unfinished_picks_up_running_runs_only() {
    let dir = tempfile::tempdir().unwrap();
    let step = Recorder::new("only");
    let log = Arc::new(JsonlStepLog::new(dir.path()).unwrap());

    log.create(&TaskRun::new("pending", "s", Value::Null)).await.unwrap();
    log.create(&TaskRun::new("finished", "s", Value::Null)).await.unwrap();
    log.set_status("finished", RunStatus::Done, None).await.unwrap();

    // A fresh engine over the same directory, as after a restart.
    let engine = TaskEngine::new(
        Arc::new(JsonlStepLog::new(dir.path()).unwrap()),
        Arc::new(Pipeline::new("p", vec![step.clone() as Arc<dyn Step>]).unwrap()),
        cfg(),
    );
    let resumed = engine.resume_unfinished().await.unwrap();
    assert_eq!(resumed, vec!["pending".to_string()]);

    wait_for_status(&engine, "pending", RunStatus::Done).await;
    assert_eq!(step.calls(), 1);
}
