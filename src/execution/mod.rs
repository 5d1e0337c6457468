//! Pipeline execution engine

pub mod decorators;
pub mod node;
pub mod pipeline;
pub mod service;
mod step;
mod steps;

pub use decorators::{Action, Decorator, GROUP_DECORATORS, STEP_DECORATORS};
pub use node::{NodeHandle, NodeSettings};
pub use pipeline::{Pipeline, SequenceDescription, Timestamps, PIPELINE_ID_VAR, PIPELINE_WORKSPACE_VAR};
pub use service::{
    PipelineOptions, PipelineService, PipelineSummary, RuntimeFactory, ServiceConfig, LATEST_ALIAS,
};
