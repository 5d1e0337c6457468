//! Test: Loops - loop counts, for-each expansion, unresolved sources

use crate::helpers::*;
use pipeline_engine::core::NodeType;
use pipeline_engine::{PipelineStatus, StepStatus};
use std::sync::Arc;

#[tokio::test]
async fn test_loop_expands_into_numbered_iterations() {
    let yaml = r#"
steps:
  - name: bench
    commands: [run-bench]
    loop: 3
    counter-variable: RUN
  - name: report
    commands: [report]
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "bench", yaml).await;

    let status = service.start_pipeline("bench").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["bench-1", "bench-2", "bench-3", "report"]);

    let runs: Vec<Option<String>> = runtime
        .calls()
        .iter()
        .take(3)
        .map(|c| entry_value(c, "RUN"))
        .collect();
    assert_eq!(
        runs,
        vec![Some("1".to_string()), Some("2".to_string()), Some("3".to_string())]
    );

    // The step became a group holding its iterations
    let bench = pipeline.node("bench").unwrap();
    assert_eq!(bench.node_type(), NodeType::Steps);
    assert_eq!(bench.children().len(), 3);
    assert_eq!(bench.status(), StepStatus::Successful);
}

#[tokio::test]
async fn test_loop_count_from_environment() {
    let yaml = r#"
environment:
  - name: SHARDS
    value: 2
steps:
  - name: shard
    commands: [run]
    loop: $$SHARDS
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    add_yaml(&service, "shards", yaml).await;

    let status = service.start_pipeline("shards").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["shard-1", "shard-2"]);
}

#[tokio::test]
async fn test_zero_loop_skips_step() {
    let yaml = r#"
steps:
  - name: nothing
    commands: [run]
    loop: 0
  - name: after
    commands: [run]
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "zero", yaml).await;

    let status = service.start_pipeline("zero").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["after"]);
    assert_eq!(step_status(&pipeline, "nothing"), StepStatus::Skipped);
}

#[tokio::test]
async fn test_non_numeric_loop_runs_nothing() {
    let yaml = r#"
steps:
  - name: odd
    commands: [run]
    loop: many
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "odd", yaml).await;

    let status = service.start_pipeline("odd").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert!(runtime.step_names().is_empty());
    assert_eq!(step_status(&pipeline, "odd"), StepStatus::Skipped);
}

/// A substituted count above the ceiling fails before any iteration is built
#[tokio::test]
async fn test_substituted_loop_above_ceiling_fails_step() {
    let yaml = r#"
environment:
  - name: SHARDS
    value: 50000000
steps:
  - name: shard
    commands: [run]
    loop: $$SHARDS
  - name: report
    commands: [report]
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "shards", yaml).await;

    let status = service.start_pipeline("shards").await.unwrap();

    assert_eq!(status, PipelineStatus::Failed);
    assert!(runtime.step_names().is_empty());
    assert_statuses(
        &pipeline,
        &[("shard", StepStatus::Failed), ("report", StepStatus::Skipped)],
    );
    let errors = pipeline.errors();
    assert!(errors.iter().any(|e| e.contains("at most 10000")), "errors: {:?}", errors);
}

#[tokio::test]
async fn test_unresolved_loop_token_skips_step() {
    let yaml = r#"
steps:
  - name: pending
    commands: [run]
    loop: $$NOT_DEFINED
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "pending", yaml).await;

    let status = service.start_pipeline("pending").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert!(runtime.step_names().is_empty());
    assert_eq!(step_status(&pipeline, "pending"), StepStatus::Skipped);
}

#[tokio::test]
async fn test_for_each_binds_element_variable() {
    let yaml = r#"
environment:
  - name: REGIONS
    value: "eu, us ,ap"
steps:
  - name: deploy
    commands: ["deploy $$REGION"]
    for-each: $$REGIONS
    element-variable: REGION
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "deploy", yaml).await;

    let status = service.start_pipeline("deploy").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["deploy-1", "deploy-2", "deploy-3"]);

    let calls = runtime.calls();
    let regions: Vec<Option<String>> = calls.iter().map(|c| entry_value(c, "REGION")).collect();
    assert_eq!(
        regions,
        vec![Some("eu".to_string()), Some("us".to_string()), Some("ap".to_string())]
    );
    assert_eq!(calls[1].commands, vec!["deploy us"]);
    assert_eq!(pipeline.node("deploy").unwrap().children().len(), 3);
}

#[tokio::test]
async fn test_parallel_for_each_runs_iterations_together() {
    let yaml = r#"
steps:
  - name: matrix
    commands: [test]
    for-each: [a, b, c]
    element-variable: CASE
    parallel: true
"#;
    let runtime = Arc::new(
        RecordingRuntime::new()
            .with_delay("matrix-1", std::time::Duration::from_millis(30))
            .with_delay("matrix-2", std::time::Duration::from_millis(30))
            .with_delay("matrix-3", std::time::Duration::from_millis(30)),
    );
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "matrix", yaml).await;

    let status = service.start_pipeline("matrix").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_eq!(runtime.max_concurrency(), 3);
    assert!(pipeline.node("matrix").unwrap().is_parallel());
}

#[tokio::test]
async fn test_empty_for_each_skips_step() {
    let yaml = r#"
environment:
  - name: TARGETS
    value: " , "
steps:
  - name: publish
    commands: [publish]
    for-each: $$TARGETS
    element-variable: TARGET
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "publish", yaml).await;

    let status = service.start_pipeline("publish").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert!(runtime.step_names().is_empty());
    assert_eq!(step_status(&pipeline, "publish"), StepStatus::Skipped);
}
