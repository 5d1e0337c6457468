//! Test: Failure Handling - cascade, retry, continue-on-fail, timeouts

use crate::helpers::*;
use pipeline_engine::{PipelineError, PipelineStatus, StepStatus};
use std::sync::Arc;
use std::time::Duration;

/// A failed step skips every remaining ready step in the pipeline
#[tokio::test]
async fn test_failure_skips_remaining_steps() {
    let yaml = r#"
steps:
  - name: compile
    commands: [make]
  - name: test
    commands: [make test]
  - name: package
    steps:
      - name: archive
        commands: [tar]
      - name: sign
        commands: [gpg]
"#;
    let runtime = Arc::new(RecordingRuntime::new().fail_on("test"));
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "build", yaml).await;

    let status = service.start_pipeline("build").await.unwrap();

    assert_eq!(status, PipelineStatus::Failed);
    assert_execution_order(&runtime, &["compile", "test"]);
    assert_statuses(
        &pipeline,
        &[
            ("compile", StepStatus::Successful),
            ("test", StepStatus::Failed),
            ("archive", StepStatus::Skipped),
            ("sign", StepStatus::Skipped),
            ("package", StepStatus::Skipped),
        ],
    );

    let errors = pipeline.errors();
    assert!(errors.iter().any(|e| e.contains("test")), "errors: {:?}", errors);
}

/// Siblings already running in a parallel group finish; later steps are skipped
#[tokio::test]
async fn test_parallel_failure_lets_running_siblings_finish() {
    let yaml = r#"
steps:
  - name: checks
    parallel: true
    steps:
      - name: slow
        commands: [sleep]
      - name: boom
        commands: [exit 1]
  - name: after
    commands: [deploy]
"#;
    let runtime = Arc::new(
        RecordingRuntime::new()
            .fail_on("boom")
            .with_delay("slow", Duration::from_millis(50)),
    );
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "checks", yaml).await;

    let status = service.start_pipeline("checks").await.unwrap();

    assert_eq!(status, PipelineStatus::Failed);
    assert_eq!(runtime.count("after"), 0);
    assert_statuses(
        &pipeline,
        &[
            ("slow", StepStatus::Successful),
            ("boom", StepStatus::Failed),
            ("after", StepStatus::Skipped),
            ("checks", StepStatus::Failed),
        ],
    );
}

#[tokio::test]
async fn test_retry_recovers_flaky_step() {
    let yaml = r#"
steps:
  - name: flaky
    commands: [curl]
    retry:
      iterations: 3
      backoff: 0
  - name: next
    commands: [echo]
"#;
    let runtime = Arc::new(RecordingRuntime::new().fail_times("flaky", 2));
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "flaky", yaml).await;

    let status = service.start_pipeline("flaky").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["flaky", "flaky", "flaky", "next"]);
    assert_eq!(step_status(&pipeline, "flaky"), StepStatus::Successful);
}

#[tokio::test]
async fn test_retry_gives_up_after_iterations() {
    let yaml = r#"
environment:
  - name: ATTEMPTS
    value: 2
steps:
  - name: broken
    commands: [false]
    retry:
      iterations: $$ATTEMPTS
"#;
    let runtime = Arc::new(RecordingRuntime::new().fail_on("broken"));
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "broken", yaml).await;

    let status = service.start_pipeline("broken").await.unwrap();

    assert_eq!(status, PipelineStatus::Failed);
    assert_eq!(runtime.count("broken"), 2);
    assert_eq!(step_status(&pipeline, "broken"), StepStatus::Failed);
}

#[tokio::test]
async fn test_continue_on_fail_keeps_pipeline_going() {
    let yaml = r#"
steps:
  - name: lint
    commands: [lint]
    continue-on-fail: true
  - name: build
    commands: [make]
"#;
    let runtime = Arc::new(RecordingRuntime::new().fail_on("lint"));
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "lenient", yaml).await;

    let status = service.start_pipeline("lenient").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["lint", "build"]);
    assert_eq!(step_status(&pipeline, "build"), StepStatus::Successful);
}

#[tokio::test]
async fn test_step_timeout_fails_pipeline() {
    let yaml = r#"
steps:
  - name: hang
    commands: [sleep 60]
    timeout: 0.05
  - name: never
    commands: [echo]
"#;
    let runtime = Arc::new(RecordingRuntime::new().with_delay("hang", Duration::from_secs(5)));
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "hang", yaml).await;

    let status = service.start_pipeline("hang").await.unwrap();

    assert_eq!(status, PipelineStatus::Failed);
    assert_statuses(
        &pipeline,
        &[("hang", StepStatus::Failed), ("never", StepStatus::Skipped)],
    );
    assert!(pipeline.errors().iter().any(|e| e.contains("timed out")));
}

/// Definition errors fail the pipeline before anything runs
#[tokio::test]
async fn test_invalid_definition_fails_on_load() {
    let yaml = r#"
steps:
  - name: empty-group
    steps: []
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "invalid", yaml).await;

    let err = pipeline.load_and_validate().unwrap_err();

    assert!(matches!(err, PipelineError::Validation { .. }));
    assert_eq!(pipeline.status(), PipelineStatus::Failed);
    assert!(!pipeline.errors().is_empty());
    assert_eq!(runtime.inits(), 0);
}
