//! Run the inner action `loop` times in sequence (once when unset)

use crate::core::definition::parse_count;
use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;
use tracing::{debug, warn};

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        let count = match node.settings().loop_count {
            None => 1,
            Some(raw) => parse_count(&raw).unwrap_or_else(|| {
                warn!("'{}': loop '{}' is not a number, nothing to run", node.name(), raw);
                0
            }),
        };

        for iteration in 1..=count {
            if count > 1 {
                debug!("'{}' iteration {}/{}", node.name(), iteration, count);
            }
            inner().await?;
        }
        Ok(())
    })
}
