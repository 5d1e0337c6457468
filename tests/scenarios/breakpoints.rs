//! Test: Breakpoints - resume to a step, step-by-step runs, last-step detection

use crate::helpers::*;
use pipeline_engine::{PipelineError, PipelineStatus, StepStatus};
use std::sync::Arc;
use std::time::Duration;

/// Resuming to a step pauses right after it finishes
#[tokio::test]
async fn test_resume_to_step_pauses_after_it() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;

    let status = service.resume_pipeline("nested", Some("1.1")).await.unwrap();

    assert_eq!(status, PipelineStatus::Paused);
    assert_eq!(pipeline.breakpoint().as_deref(), Some("1.1"));
    assert_execution_order(&runtime, &["1.1"]);
    assert_statuses(
        &pipeline,
        &[
            ("1.1", StepStatus::Successful),
            ("1.2.1", StepStatus::Ready),
            ("2.1", StepStatus::Ready),
        ],
    );

    // Run to the end
    let status = service.resume_pipeline("nested", None).await.unwrap();
    assert_eq!(status, PipelineStatus::Successful);
    assert_eq!(runtime.step_names().len(), 6);
    assert_eq!(runtime.inits(), 1);
}

/// A breakpoint on a parallel child pauses once the whole group is done
#[tokio::test]
async fn test_breakpoint_inside_parallel_group_widens_to_group() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;

    let status = service.resume_pipeline("nested", Some("1.2.1")).await.unwrap();

    assert_eq!(status, PipelineStatus::Paused);
    assert_eq!(pipeline.breakpoint().as_deref(), Some("1.2"));
    assert_statuses(
        &pipeline,
        &[
            ("1.2.1", StepStatus::Successful),
            ("1.2.2", StepStatus::Successful),
            ("1.3.1", StepStatus::Ready),
        ],
    );
}

/// next_step walks the tree one ready step (or parallel group) at a time
#[tokio::test]
async fn test_step_by_step_sequence() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;

    let expected = [
        (Some("1.1"), vec!["1.1"]),
        (Some("1.2"), vec!["1.1", "1.2.1", "1.2.2"]),
        (Some("1.3.1"), vec!["1.1", "1.2.1", "1.2.2", "1.3.1"]),
        (Some("1.3.2"), vec!["1.1", "1.2.1", "1.2.2", "1.3.1", "1.3.2"]),
    ];
    for (breakpoint, ran) in expected {
        let status = service.next_step_in_pipeline("nested").await.unwrap();
        assert_eq!(status, PipelineStatus::Paused);
        assert_eq!(pipeline.breakpoint().as_deref(), breakpoint);

        let mut names = runtime.step_names();
        names.sort();
        assert_eq!(names, ran);
    }

    // 2.1 is the last step: the breakpoint clears and the run completes
    let status = service.next_step_in_pipeline("nested").await.unwrap();
    assert_eq!(status, PipelineStatus::Successful);
    assert_eq!(pipeline.breakpoint(), None);
    assert_eq!(step_status(&pipeline, "2.1"), StepStatus::Successful);

    let err = service.next_step_in_pipeline("nested").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidState { .. }));
}

/// Resuming to the last node means running to completion
#[tokio::test]
async fn test_resume_to_last_step_runs_to_end() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;

    let status = service.resume_pipeline("nested", Some("2.1")).await.unwrap();

    assert_eq!(status, PipelineStatus::Successful);
    assert_eq!(pipeline.breakpoint(), None);
    assert_eq!(runtime.step_names().len(), 6);
}

#[tokio::test]
async fn test_resume_to_unknown_step() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;

    let err = service
        .resume_pipeline("nested", Some("9.9"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NodeNotFound(ref name) if name == "9.9"));
    assert_eq!(pipeline.status(), PipelineStatus::Loaded);
    assert!(runtime.step_names().is_empty());
}

/// Killing a paused pipeline skips it and releases the runtime
#[tokio::test]
async fn test_kill_at_breakpoint() {
    let runtime = Arc::new(RecordingRuntime::new());
    let service = service_with(Arc::clone(&runtime));
    let pipeline = add_yaml(&service, "nested", NESTED).await;

    service.resume_pipeline("nested", Some("1.1")).await.unwrap();
    let terminal = pipeline.await_status_change(Some(&[PipelineStatus::Skipped]));
    service.kill_all().await;

    assert_eq!(terminal.await, PipelineStatus::Skipped);
    assert_eq!(pipeline.status(), PipelineStatus::Skipped);
    assert!(runtime.teardowns() >= 1);
    assert_execution_order(&runtime, &["1.1"]);
}

async fn settle<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("pipeline settled")
}

/// Same runs on a multi-threaded runtime, where the run advances while the caller is not yet awaiting
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resume_to_breakpoint_on_worker_threads() {
    for _ in 0..25 {
        let runtime = Arc::new(RecordingRuntime::new());
        let service = service_with(Arc::clone(&runtime));
        let pipeline = add_yaml(&service, "nested", NESTED).await;

        let status = settle(service.resume_pipeline("nested", Some("1.3.1")))
            .await
            .unwrap();
        assert_eq!(status, PipelineStatus::Paused);
        assert_eq!(pipeline.breakpoint().as_deref(), Some("1.3.1"));
        assert_eq!(step_status(&pipeline, "1.3.2"), StepStatus::Ready);

        let status = settle(service.resume_pipeline("nested", None)).await.unwrap();
        assert_eq!(status, PipelineStatus::Successful);
        assert_eq!(runtime.step_names().len(), 6);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_step_by_step_walk_on_worker_threads() {
    for _ in 0..25 {
        let runtime = Arc::new(RecordingRuntime::new());
        let service = service_with(Arc::clone(&runtime));
        let pipeline = add_yaml(&service, "nested", NESTED).await;

        let mut breakpoints = Vec::new();
        loop {
            let status = settle(service.next_step_in_pipeline("nested")).await.unwrap();
            if status.is_terminal() {
                assert_eq!(status, PipelineStatus::Successful);
                break;
            }
            assert_eq!(status, PipelineStatus::Paused);
            breakpoints.push(pipeline.breakpoint().unwrap_or_default());
        }

        assert_eq!(breakpoints, vec!["1.1", "1.2", "1.3.1", "1.3.2"]);
        assert_eq!(runtime.step_names().len(), 6);
        assert_eq!(pipeline.breakpoint(), None);
    }
}
