//! Swallow the inner action's error when `continue-on-fail` is set

use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;
use tracing::warn;

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        match inner().await {
            Err(e) if node.settings().continue_on_fail => {
                warn!("'{}' failed, continuing: {}", node.name(), e);
                Ok(())
            }
            result => result,
        }
    })
}
