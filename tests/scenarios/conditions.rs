//! Test: Conditions - `when` gates steps and groups, substitution and describe output

use crate::helpers::*;
use pipeline_engine::{PipelineStatus, StepStatus, Variable};
use std::sync::Arc;

const GATED: &str = r#"
environment:
  - name: BRANCH
    value: dev
steps:
  - name: build
    commands: ["make VERSION=$$VERSION"]
  - name: publish
    commands: [publish]
    when:
      - operator: EQ
        value: $$BRANCH
        other: main
  - name: notify
    commands: [notify]
    when:
      - operator: OR
        conditions:
          - operator: STARTS_WITH
            value: $$BRANCH
            other: release/
          - operator: MATCHES
            value: $$BRANCH
            other: "dev|feature/.*"
"#;

#[tokio::test]
async fn test_false_condition_skips_step() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "gated", GATED).await;

    let status = service.start_pipeline("gated").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["build", "notify"]);
    assert_statuses(
        &pipeline,
        &[
            ("build", StepStatus::Successful),
            ("publish", StepStatus::Skipped),
            ("notify", StepStatus::Successful),
        ],
    );
}

/// Variables set after loading override definition values
#[tokio::test]
async fn test_variable_override_changes_condition() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "gated", GATED).await;

    pipeline.load_and_validate().unwrap();
    pipeline.set_variable(Variable::new("BRANCH", "main")).unwrap();
    pipeline.set_variable(Variable::new("VERSION", "1.4.0")).unwrap();

    let status = service.start_pipeline("gated").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["build", "publish"]);
    assert_eq!(runtime.calls()[0].commands, vec!["make VERSION=1.4.0"]);
    assert_eq!(step_status(&pipeline, "notify"), StepStatus::Skipped);
}

#[tokio::test]
async fn test_false_condition_skips_whole_group() {
    let yaml = r#"
environment:
  - name: DEPLOY
    value: "no"
steps:
  - name: deploy
    when:
      - operator: EQ
        value: $$DEPLOY
        other: "yes"
    steps:
      - name: upload
        commands: [upload]
      - name: migrate
        commands: [migrate]
  - name: done
    commands: [echo]
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "deploy", yaml).await;

    let status = service.start_pipeline("deploy").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["done"]);
    assert_statuses(
        &pipeline,
        &[
            ("deploy", StepStatus::Skipped),
            ("upload", StepStatus::Skipped),
            ("migrate", StepStatus::Skipped),
        ],
    );
}

/// Secrets reach the runtime but are listed separately from plain variables
#[tokio::test]
async fn test_secret_values_are_substituted() {
    let yaml = r#"
environment:
  - name: TOKEN
    value: s3cr3t
    type: secret
steps:
  - name: login
    commands: ["login --token $$TOKEN"]
"#;
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "login", yaml).await;

    service.start_pipeline("login").await.unwrap();

    assert_eq!(runtime.calls()[0].commands, vec!["login --token s3cr3t"]);
    let environment = pipeline.environment();
    assert_eq!(environment.redact("token=s3cr3t"), "token=********");
}

#[tokio::test]
async fn test_describe_lists_step_environment_keys() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;
    pipeline.load_and_validate().unwrap();

    let description = pipeline.describe_sequence();

    assert_eq!(description.status, PipelineStatus::Loaded);
    assert_eq!(description.name, "nested");
    let keys: Vec<&str> = description.environment_keys.iter().map(String::as_str).collect();
    assert_eq!(keys, vec!["REGION", "TARGET"]);

    let root = description.sequence.unwrap();
    let top: Vec<&str> = root
        .steps
        .iter()
        .flatten()
        .map(|n| n.name.as_str())
        .collect();
    assert_eq!(top, vec!["1", "2.1"]);
}
