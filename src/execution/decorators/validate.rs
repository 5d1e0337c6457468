//! Re-check the substituted definition and refuse to run an invalid one

use crate::core::error::PipelineError;
use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        let errors = node.validate();
        if !errors.is_empty() {
            return Err(PipelineError::Validation { errors });
        }
        inner().await
    })
}
