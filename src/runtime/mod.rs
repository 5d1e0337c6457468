//! Runtime executor: the collaborator that actually runs a step

pub mod config;
pub mod error;
pub mod process;

use crate::core::definition::{RegistryDefinition, StepDefinition};
use crate::core::environment::Environment;
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

pub use config::{RuntimeConfig, RuntimeMode};
pub use error::RuntimeError;
pub use process::ProcessRuntime;

/// What a runtime needs to know about the pipeline it serves
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub pipeline_id: Uuid,
    pub pipeline_name: String,
    pub workspace: PathBuf,
    /// Snapshot of the pipeline environment, used for internal variables and redaction
    pub environment: Environment,
    pub registries: Vec<RegistryDefinition>,
}

/// Result of a preprocessor container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessorOutput {
    pub status: i32,
    pub output: String,
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait RuntimeExecutor: Send + Sync {
    /// Prepare the runtime for one pipeline; a second call fails
    async fn init(&self, context: &RuntimeContext) -> Result<(), RuntimeError>;

    /// Run a resolved step and return it with `exit_code` filled in
    ///
    /// Fails on a non-zero exit unless the step runs in the background.
    async fn run_step(&self, step: StepDefinition) -> Result<StepDefinition, RuntimeError>;

    /// Pipe `input` through a transform image
    async fn run_preprocessor(
        &self,
        image: &str,
        input: &str,
    ) -> Result<PreprocessorOutput, RuntimeError>;

    /// Release everything created by `init` and `run_step`; safe to call repeatedly
    async fn tear_down(&self) -> Result<(), RuntimeError>;
}
