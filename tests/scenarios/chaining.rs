//! Test: Chaining - next pipelines, teardown pipelines, aliases

use crate::helpers::*;
use pipeline_engine::{Pipeline, PipelineError, PipelineKind, PipelineService, PipelineStatus};
use std::sync::Arc;

const BUILD: &str = r#"
name: build
steps:
  - name: compile
    commands: [make]
"#;

const DEPLOY: &str = r#"
name: deploy
steps:
  - name: ship
    commands: [ship]
"#;

const CLEANUP: &str = r#"
name: cleanup
steps:
  - name: prune
    commands: [prune]
"#;

/// build -> deploy -> cleanup (teardown)
async fn chain(runtime: Arc<RecordingRuntime>) -> (PipelineService, [Arc<Pipeline>; 3]) {
    let service = service_with(runtime);
    let cleanup = add_yaml_with(&service, "cleanup", CLEANUP, PipelineKind::Teardown, None).await;
    let deploy = add_yaml_with(&service, "deploy", DEPLOY, PipelineKind::Standard, Some("cleanup")).await;
    let build = add_yaml_with(&service, "build", BUILD, PipelineKind::Standard, Some("deploy")).await;
    (service, [build, deploy, cleanup])
}

#[tokio::test]
async fn test_chain_runs_in_order() {
    let runtime = Arc::new(RecordingRuntime::new());
    let (service, [build, deploy, cleanup]) = chain(Arc::clone(&runtime)).await;

    let status = service.start_pipeline("build").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["compile", "ship", "prune"]);
    for pipeline in [&build, &deploy, &cleanup] {
        assert_eq!(pipeline.status(), PipelineStatus::Successful);
    }
}

/// After a failure the standard successor is skipped, the teardown still runs
#[tokio::test]
async fn test_failure_skips_standard_but_runs_teardown() {
    let runtime = Arc::new(RecordingRuntime::new().fail_on("compile"));
    let (service, [build, deploy, cleanup]) = chain(Arc::clone(&runtime)).await;

    let status = service.start_pipeline("build").await.unwrap();

    assert_eq!(status, PipelineStatus::Failed);
    assert_execution_order(&runtime, &["compile", "prune"]);
    assert_eq!(build.status(), PipelineStatus::Failed);
    assert_eq!(deploy.status(), PipelineStatus::Skipped);
    assert_eq!(cleanup.status(), PipelineStatus::Successful);
    assert_eq!(
        service.status("build", true).await.unwrap(),
        PipelineStatus::Failed
    );
}

/// A breakpoint run finishes the rest of the chain once the first pipeline ends
#[tokio::test]
async fn test_finish_chain_after_breakpoint_run() {
    let runtime = Arc::new(RecordingRuntime::new());
    let (service, [build, _, cleanup]) = chain(Arc::clone(&runtime)).await;

    let status = service.resume_pipeline("build", None).await.unwrap();
    assert_eq!(status, PipelineStatus::Successful);
    assert_eq!(cleanup.status(), PipelineStatus::Ready);
    assert_eq!(build.chained_status(), PipelineStatus::Ready);

    let status = service.finish_chain("build").await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_execution_order(&runtime, &["compile", "ship", "prune"]);
}

#[tokio::test]
async fn test_latest_alias_and_lookup() {
    let runtime = Arc::new(RecordingRuntime::new());
    let (service, [build, _, _]) = chain(runtime).await;

    let latest = service.get_pipeline("latest").await.unwrap();
    assert_eq!(latest.id(), build.id());
    let by_id = service.get_pipeline(&build.id().to_string()).await.unwrap();
    assert_eq!(by_id.id(), build.id());

    let err = service.get_pipeline("missing").await.unwrap_err();
    assert!(matches!(err, PipelineError::PipelineNotFound(_)));

    let summaries = service.list_pipelines().await;
    assert_eq!(summaries.len(), 3);
    assert!(summaries
        .iter()
        .any(|s| s.kind == PipelineKind::Teardown && s.aliases.contains(&"cleanup".to_string())));
}

#[tokio::test]
async fn test_started_pipeline_cannot_start_again() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    add_yaml(&service, "build", BUILD).await;

    service.start_pipeline("build").await.unwrap();
    let err = service.start_pipeline("build").await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::InvalidState { status: PipelineStatus::Successful, .. }
    ));
    assert_eq!(runtime.count("compile"), 1);
}
