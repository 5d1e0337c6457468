//! Behavior wrappers composed around a node's base action
//!
//! Every decorator takes the node and an inner [`Action`] and returns an
//! outer one. Chains are folded left to right, so the last decorator in a
//! chain is the outermost and runs first. Settings are read when the
//! action is invoked, not when it is built.

pub mod condition;
pub mod continue_on_fail;
pub mod loop_decorator;
pub mod modify;
pub mod retry;
pub mod timeout;
pub mod validate;

use crate::core::error::PipelineError;
use crate::execution::node::NodeHandle;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<(), PipelineError>> + Send>>;

/// Deferred invocation: building it does no work, calling it runs the wrapped logic
pub type Action = Arc<dyn Fn() -> ActionFuture + Send + Sync>;

pub type Decorator = fn(&NodeHandle, Action) -> Action;

/// Chain for steps; `condition` ends up outermost
pub const STEP_DECORATORS: &[Decorator] = &[
    modify::decorate,
    validate::decorate,
    timeout::decorate,
    retry::decorate,
    continue_on_fail::decorate,
    loop_decorator::decorate,
    condition::decorate,
];

/// Chain for groups
pub const GROUP_DECORATORS: &[Decorator] = &[timeout::decorate, retry::decorate, condition::decorate];

pub fn decorate(node: &NodeHandle, base: Action, chain: &[Decorator]) -> Action {
    chain
        .iter()
        .fold(base, |action, decorator| decorator(node, action))
}

/// Build an action from an async closure over the node and the inner action
pub(crate) fn wrap<F, Fut>(node: &NodeHandle, inner: Action, body: F) -> Action
where
    F: Fn(NodeHandle, Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    let node = node.clone();
    Arc::new(move || -> ActionFuture { Box::pin(body(node.clone(), Arc::clone(&inner))) })
}
