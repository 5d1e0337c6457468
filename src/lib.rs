//! pipeline-engine - a CI/CD pipeline execution engine
//!
//! Pipelines are YAML definitions of steps and step groups. The engine
//! turns them into a node tree, wraps every node's action in decorators
//! (condition, loop, retry, timeout, continue-on-fail) and walks the tree
//! against a [`RuntimeExecutor`], with breakpoints for step-by-step runs.

pub mod cli;
pub mod core;
pub mod execution;
pub mod runtime;


// Re-export commonly used types
pub use crate::core::{
    Environment, ErrorKind, PipelineDefinition, PipelineError, PipelineKind, PipelineSource,
    PipelineStatus, StepDefinition, StepStatus, Variable, VariableType,
};
pub use execution::{NodeHandle, Pipeline, PipelineOptions, PipelineService, ServiceConfig};
pub use runtime::{ProcessRuntime, RuntimeConfig, RuntimeError, RuntimeExecutor, RuntimeMode};
