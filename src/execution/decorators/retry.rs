//! Re-run a failing action up to `retry.iterations` times

use crate::core::definition::{parse_count, parse_seconds};
use crate::core::error::PipelineError;
use crate::execution::decorators::{wrap, Action};
use crate::execution::node::NodeHandle;
use std::time::Duration;
use tracing::{info, warn};

pub fn decorate(node: &NodeHandle, inner: Action) -> Action {
    wrap(node, inner, |node, inner| async move {
        let Some(retry) = node.settings().retry else {
            return inner().await;
        };

        let iterations = match retry.iterations.as_deref() {
            Some(raw) => parse_count(raw).ok_or_else(|| {
                PipelineError::validation(format!(
                    "'{}': invalid retry iterations '{}'",
                    node.name(),
                    raw
                ))
            })?,
            None => 1,
        }
        .max(1);
        let backoff = match retry.backoff.as_deref() {
            Some(raw) => parse_seconds(raw).ok_or_else(|| {
                PipelineError::validation(format!(
                    "'{}': invalid retry backoff '{}'",
                    node.name(),
                    raw
                ))
            })?,
            None => 0.0,
        };

        let mut attempt = 1;
        loop {
            match inner().await {
                Ok(()) => {
                    if attempt > 1 {
                        info!("'{}' succeeded on attempt {}", node.name(), attempt);
                    }
                    return Ok(());
                }
                Err(e) if attempt >= iterations => return Err(e),
                Err(e) => {
                    warn!(
                        "'{}' attempt {}/{} failed: {}; retrying in {}s",
                        node.name(),
                        attempt,
                        iterations,
                        e,
                        backoff
                    );
                    if backoff > 0.0 {
                        tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    }
                    attempt += 1;
                }
            }
        }
    })
}
