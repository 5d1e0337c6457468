//! Race the inner action against `timeout` seconds
//!
//! The inner action runs on its own task. When the timer wins that task is
//! left running; only the wait is given up.

use crate::core::definition::parse_seconds;
use crate::core::error::PipelineError;
use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;
use std::time::Duration;
use tracing::warn;

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        let Some(raw) = node.settings().timeout else {
            return inner().await;
        };
        let seconds = parse_seconds(&raw).filter(|s| *s > 0.0).ok_or_else(|| {
            PipelineError::validation(format!("'{}': invalid timeout '{}'", node.name(), raw))
        })?;

        let task = tokio::spawn(inner());
        match tokio::time::timeout(Duration::from_secs_f64(seconds), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(PipelineError::Execution(format!(
                "'{}' task aborted: {}",
                node.name(),
                e
            ))),
            Err(_) => {
                warn!("'{}' timed out after {}s", node.name(), seconds);
                Err(PipelineError::Timeout {
                    step: node.name(),
                    seconds,
                })
            }
        }
    })
}
