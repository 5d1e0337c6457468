//! Substitute `$$` tokens in a step's working definition before it runs

use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;
use tracing::debug;

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        node.apply_environment();
        debug!("Resolved environment for '{}'", node.name());
        inner().await
    })
}
