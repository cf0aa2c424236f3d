use docent_domain::error::{Error, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// What a step sees when it executes.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub source_session_id: String,
    pub params: Value,
    /// Results of the steps that precede this one, logged or fresh.
    pub results: BTreeMap<String, Value>,
    /// 1-based attempt number for this step.
    pub attempt: u32,
}

impl StepContext {
    /// Result of an earlier step, or a `TaskStep` error naming it.
    pub fn result(&self, step: &str) -> Result<&Value> {
        self.results.get(step).ok_or_else(|| Error::TaskStep {
            step: step.to_string(),
            message: "result not available".into(),
        })
    }
}

/// One named unit of work.
///
/// A crash after `execute` returns but before its record is logged makes
/// the step run again, so side effects must tolerate repetition.
#[async_trait::async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &StepContext) -> Result<Value>;
}

/// An ordered, uniquely named list of steps.
pub struct Pipeline {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

impl Pipeline {
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Step>>) -> Result<Self> {
        let name = name.into();
        if steps.is_empty() {
            return Err(Error::Config(format!("pipeline '{name}' has no steps")));
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name().to_string()) {
                return Err(Error::Config(format!(
                    "pipeline '{name}' declares step '{}' twice",
                    step.name()
                )));
            }
        }
        Ok(Self { name, steps })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait::async_trait]
    impl Step for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn execute(&self, _ctx: &StepContext) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn duplicate_step_names_are_rejected() {
        let err = Pipeline::new("p", vec![Arc::new(Named("a")), Arc::new(Named("a"))]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn empty_pipeline_is_rejected() {
        assert!(Pipeline::new("p", Vec::new()).is_err());
    }

    #[test]
    fn step_names_keep_declared_order() {
        let p = Pipeline::new("p", vec![Arc::new(Named("b")), Arc::new(Named("a"))]).unwrap();
        assert_eq!(p.step_names(), vec!["b", "a"]);
    }
}
