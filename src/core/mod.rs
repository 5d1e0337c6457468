//! Core domain models
//!
//! Pipeline definitions, the node tree, environment handling and status
//! enums. Nothing in here is async; the engine lives in `execution`.

pub mod condition;
pub mod definition;
pub mod environment;
pub mod error;
pub mod importer;
pub mod state;
pub mod tree;

pub use condition::ConditionEvaluator;
pub use definition::*;
pub use environment::{Environment, Variable, VariableType, REDACTED};
pub use error::{ErrorKind, PipelineError};
pub use importer::{ImportedPipeline, PipelineImporter, PipelineSource, YamlImporter};
pub use state::*;
pub use tree::{NodeDescription, NodeId, Tree};
