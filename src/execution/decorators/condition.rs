//! Gate the inner action on `when`; a false clause skips the node without error

use crate::core::condition::ConditionEvaluator;
use crate::core::state::StepStatus;
use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;
use tracing::info;

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        let Some(conditions) = node.settings().when else {
            return inner().await;
        };

        let environment = node.scoped_environment();
        let workspace = node.workspace_path();
        let passed = ConditionEvaluator::new(&environment, &workspace).all(&conditions);

        if passed {
            inner().await
        } else {
            info!("Condition not met, skipping '{}'", node.name());
            node.set_status(StepStatus::Skipped);
            Ok(())
        }
    })
}
