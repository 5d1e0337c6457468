//! Steps.start: serial or parallel walk over a group's children

use crate::core::error::PipelineError;
use crate::execution::decorators::{self, Action, ActionFuture, GROUP_DECORATORS};
use crate::execution::node::NodeHandle;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

async fn run_parallel(node: &NodeHandle) -> Result<(), PipelineError> {
    let mut tasks = JoinSet::new();
    for child in node.children() {
        tasks.spawn(child.start());
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.unwrap_or_else(|e| {
            Err(PipelineError::Execution(format!(
                "'{}' child task aborted: {}",
                node.name(),
                e
            )))
        });
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn run_serial(node: &NodeHandle) -> Result<(), PipelineError> {
    let mut index = 0;
    while let Some(child) = node.child(index) {
        child.start().await?;
        index += 1;
    }
    Ok(())
}

/// Base action: start the children
fn children_action(node: &NodeHandle) -> Action {
    let node = node.clone();
    Arc::new(move || -> ActionFuture {
        let node = node.clone();
        Box::pin(async move {
            if node.is_parallel() {
                run_parallel(&node).await
            } else {
                run_serial(&node).await
            }
        })
    })
}

pub(crate) async fn start(node: NodeHandle) -> Result<(), PipelineError> {
    let name = node.name();
    let pipeline = Arc::clone(node.pipeline());

    pipeline.wait_while_paused().await;
    if pipeline.status().is_terminal() {
        debug!("Pipeline is {}, skipping group '{}'", pipeline.status(), name);
        node.skip_ready_steps();
        return Ok(());
    }

    if node.is_parallel() {
        let children: Vec<String> = node.children().iter().map(NodeHandle::name).collect();
        pipeline.widen_breakpoint(&children, &name);
    }

    debug!(
        "Starting {} group '{}'",
        if node.is_parallel() { "parallel" } else { "serial" },
        name
    );
    let action = decorators::decorate(&node, children_action(&node), GROUP_DECORATORS);
    let result = action().await;

    match &result {
        Ok(()) => info!("Group '{}' completed", name),
        Err(e) => error!("Group '{}' failed: {}", name, e),
    }
    pipeline.pause_at_breakpoint(&name);
    result
}
