//! Step.start: loop/for-each expansion, then the decorated runtime call

use crate::core::definition::{parse_count, StepDefinition, MAX_LOOP_ITERATIONS};
use crate::core::environment::has_unresolved_tokens;
use crate::core::error::PipelineError;
use crate::core::state::StepStatus;
use crate::execution::decorators::{self, Action, ActionFuture, STEP_DECORATORS};
use crate::execution::node::NodeHandle;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What `loop` / `for-each` resolve to for one step
#[derive(Debug)]
enum Expansion {
    /// Neither is set: run the step itself
    None,
    /// A `$$` token is still unresolved
    Unresolved,
    Iterations(Vec<StepDefinition>),
}

fn plan(node: &NodeHandle) -> Result<Expansion, PipelineError> {
    let environment = node.environment();
    let Some(definition) = node.update_definition(|d| d.substitute_iteration_source(&environment))
    else {
        return Ok(Expansion::None);
    };

    let unresolved = definition
        .loop_count
        .as_deref()
        .is_some_and(has_unresolved_tokens)
        || definition
            .for_each
            .as_ref()
            .is_some_and(|f| f.has_unresolved_tokens());
    if unresolved {
        return Ok(Expansion::Unresolved);
    }

    match (&definition.loop_count, &definition.for_each) {
        (None, None) => Ok(Expansion::None),
        (Some(_), Some(_)) => Err(PipelineError::validation(format!(
            "step '{}': loop and for-each are mutually exclusive",
            definition.name
        ))),
        (Some(raw), None) => {
            let count = parse_count(raw).unwrap_or_else(|| {
                warn!("Step '{}': loop '{}' is not a number", definition.name, raw);
                0
            });
            if count > MAX_LOOP_ITERATIONS {
                return Err(PipelineError::validation(format!(
                    "step '{}': loop must be at most {}, got '{}'",
                    definition.name, MAX_LOOP_ITERATIONS, raw
                )));
            }
            Ok(Expansion::Iterations(
                (0..count as usize)
                    .map(|i| definition.iteration(i, None))
                    .collect(),
            ))
        }
        (None, Some(for_each)) => {
            if definition.element_variable.is_none() {
                return Err(PipelineError::validation(format!(
                    "step '{}': for-each requires element-variable",
                    definition.name
                )));
            }
            Ok(Expansion::Iterations(
                for_each
                    .elements()
                    .iter()
                    .enumerate()
                    .map(|(i, element)| definition.iteration(i, Some(element)))
                    .collect(),
            ))
        }
    }
}

/// Base action: hand a copy of the working definition to the runtime
fn run_action(node: &NodeHandle) -> Action {
    let node = node.clone();
    Arc::new(move || -> ActionFuture {
        let node = node.clone();
        Box::pin(async move {
            let definition = node
                .definition()
                .ok_or_else(|| PipelineError::NodeNotFound(node.name()))?;
            match node.exec().run_step(definition).await {
                Ok(finished) => {
                    node.set_exit_code(finished.exit_code);
                    Ok(())
                }
                Err(e) => {
                    node.set_exit_code(e.exit_code());
                    Err(e.into())
                }
            }
        })
    })
}

fn fail(node: &NodeHandle, error: &PipelineError) {
    node.set_status(StepStatus::Failed);
    node.push_error(error.to_string());
    let skipped = node.skip_remaining_steps();
    error!(
        "Step '{}' failed: {} ({} remaining steps skipped)",
        node.name(),
        node.pipeline().environment().redact(&error.to_string()),
        skipped
    );
}

async fn run(node: &NodeHandle) -> Result<(), PipelineError> {
    let pipeline = node.pipeline();
    pipeline.wait_while_paused().await;
    if pipeline.status().is_terminal() {
        debug!("Pipeline is {}, skipping '{}'", pipeline.status(), node.name());
        node.set_status(StepStatus::Skipped);
        return Ok(());
    }

    let action = decorators::decorate(node, run_action(node), STEP_DECORATORS);
    if !node.begin() {
        info!("Step '{}' skipped", node.name());
        return Ok(());
    }

    info!("Running step '{}'", node.name());
    action().await?;
    node.complete();
    debug!("Step '{}' finished: {}", node.name(), node.status());
    Ok(())
}

pub(crate) async fn start(node: NodeHandle) -> Result<(), PipelineError> {
    let name = node.name();

    match plan(&node) {
        Ok(Expansion::None) => {}
        Ok(Expansion::Unresolved) => {
            info!("Step '{}' has unresolved loop or for-each tokens, skipping", name);
            node.set_status(StepStatus::Skipped);
            node.pipeline().pause_at_breakpoint(&name);
            return Ok(());
        }
        Ok(Expansion::Iterations(_)) if node.status() == StepStatus::Skipped => {
            info!("Step '{}' skipped", name);
            node.pipeline().pause_at_breakpoint(&name);
            return Ok(());
        }
        Ok(Expansion::Iterations(iterations)) if iterations.is_empty() => {
            info!("Step '{}' has no iterations", name);
            node.set_status(StepStatus::Skipped);
            node.pipeline().pause_at_breakpoint(&name);
            return Ok(());
        }
        Ok(Expansion::Iterations(iterations)) => {
            debug!("Expanding '{}' into {} iterations", name, iterations.len());
            return match node.expand(iterations) {
                // The group carries the step's name and checks the breakpoint itself
                Some(group) => group.start().await,
                None => Err(PipelineError::NodeNotFound(name)),
            };
        }
        Err(e) => {
            fail(&node, &e);
            node.pipeline().pause_at_breakpoint(&name);
            return Err(e);
        }
    }

    let result = run(&node).await;
    if let Err(e) = &result {
        fail(&node, e);
    }
    node.pipeline().pause_at_breakpoint(&name);
    result
}
