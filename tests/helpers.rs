//! Test utility functions for pipeline-engine
#![allow(dead_code)]

use async_trait::async_trait;
use pipeline_engine::execution::RuntimeFactory;
use pipeline_engine::runtime::{PreprocessorOutput, RuntimeContext};
use pipeline_engine::{
    Pipeline, PipelineKind, PipelineOptions, PipelineService, PipelineSource, RuntimeError,
    RuntimeExecutor, ServiceConfig, StepDefinition, StepStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runtime double that records every step it runs
#[derive(Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<StepDefinition>>,
    /// Remaining failures per step name; `usize::MAX` fails forever
    failures: Mutex<HashMap<String, usize>>,
    delays: HashMap<String, Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    inits: AtomicUsize,
    teardowns: AtomicUsize,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every run of the named step
    pub fn fail_on(self, step: &str) -> Self {
        self.fail_times(step, usize::MAX)
    }

    /// Fail the first `times` runs of the named step
    pub fn fail_times(self, step: &str, times: usize) -> Self {
        self.failures.lock().unwrap().insert(step.to_string(), times);
        self
    }

    pub fn with_delay(mut self, step: &str, delay: Duration) -> Self {
        self.delays.insert(step.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<StepDefinition> {
        self.calls.lock().unwrap().clone()
    }

    pub fn step_names(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.name).collect()
    }

    pub fn count(&self, step: &str) -> usize {
        self.calls().iter().filter(|c| c.name == step).count()
    }

    /// Highest number of steps that were running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    fn should_fail(&self, step: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(step) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }
}

#[async_trait]
impl RuntimeExecutor for RecordingRuntime {
    async fn init(&self, _context: &RuntimeContext) -> Result<(), RuntimeError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_step(&self, mut step: StepDefinition) -> Result<StepDefinition, RuntimeError> {
        self.calls.lock().unwrap().push(step.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&step.name) {
            tokio::time::sleep(*delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail(&step.name) {
            return Err(RuntimeError::StepFailed {
                step: step.name,
                code: 2,
                message: "exit status 2".to_string(),
            });
        }
        step.exit_code = Some(0);
        Ok(step)
    }

    async fn run_preprocessor(
        &self,
        _image: &str,
        input: &str,
    ) -> Result<PreprocessorOutput, RuntimeError> {
        Ok(PreprocessorOutput {
            status: 0,
            output: input.to_string(),
        })
    }

    async fn tear_down(&self) -> Result<(), RuntimeError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Service whose pipelines all share `runtime`
pub fn service_with(runtime: Arc<RecordingRuntime>) -> PipelineService {
    let factory: RuntimeFactory =
        Arc::new(move || Arc::clone(&runtime) as Arc<dyn RuntimeExecutor>);
    let config = ServiceConfig::default()
        .with_workspace_root(std::env::temp_dir().join("pipeline-engine-scenarios"))
        .with_shutdown_timeout(Duration::from_secs(2));
    PipelineService::new(config, factory)
}

/// Register a standard pipeline under `alias`
pub async fn add_yaml(service: &PipelineService, alias: &str, yaml: &str) -> Arc<Pipeline> {
    add_yaml_with(service, alias, yaml, PipelineKind::Standard, None).await
}

pub async fn add_yaml_with(
    service: &PipelineService,
    alias: &str,
    yaml: &str,
    kind: PipelineKind,
    next: Option<&str>,
) -> Arc<Pipeline> {
    let options = PipelineOptions {
        alias: Some(alias.to_string()),
        kind,
        next: next.map(str::to_string),
        ..Default::default()
    };
    service
        .add_pipeline(PipelineSource::Yaml(yaml.to_string()), options)
        .await
        .unwrap()
}

pub fn step_status(pipeline: &Arc<Pipeline>, name: &str) -> StepStatus {
    pipeline.node(name).unwrap().status()
}

/// Assert step statuses by name
pub fn assert_statuses(pipeline: &Arc<Pipeline>, expected: &[(&str, StepStatus)]) {
    for (name, status) in expected {
        assert_eq!(
            step_status(pipeline, name),
            *status,
            "unexpected status for '{}'",
            name
        );
    }
}

/// Assert the runtime saw exactly these steps, in order
pub fn assert_execution_order(runtime: &RecordingRuntime, expected: &[&str]) {
    assert_eq!(runtime.step_names(), expected, "execution order mismatch");
}

/// Value of an environment entry the runtime received for a step run
pub fn entry_value(step: &StepDefinition, name: &str) -> Option<String> {
    step.environment
        .iter()
        .flatten()
        .filter(|e| e.name == name)
        .last()
        .and_then(|e| e.value.clone())
}

/// The nested tree used by the breakpoint scenarios
pub const NESTED: &str = r#"
name: nested
steps:
  - name: "1"
    steps:
      - name: "1.1"
        commands: [make]
      - name: "1.2"
        parallel: true
        steps:
          - name: "1.2.1"
            commands: [make]
          - name: "1.2.2"
            commands: [make]
            environment:
              - name: TARGET
                value: x
      - name: "1.3"
        steps:
          - name: "1.3.1"
            commands: [make]
          - name: "1.3.2"
            commands: [make]
            environment:
              - name: REGION
                value: eu
  - name: "2.1"
    commands: [make]
    environment:
      - name: TARGET
        value: y
"#;
