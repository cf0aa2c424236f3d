//! `docent-tasks`: durable, checkpointed multi-step runs.
//!
//! A [`Pipeline`] is an ordered list of named [`Step`]s. The [`TaskEngine`]
//! executes it against a [`StepLog`]: every completed step is appended to
//! the log before the next one starts, and re-entering a run reuses logged
//! results instead of executing those steps again.

pub mod engine;
pub mod log;
pub mod pipeline;
pub mod run;

pub use engine::{Scheduler, TaskEngine};
pub use log::{JsonlStepLog, StepLog};
pub use pipeline::{Pipeline, Step, StepContext};
pub use run::{LogEntry, RunStatus, StepRecord, TaskRun};
