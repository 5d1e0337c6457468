//! Importer/validator collaborator: turns a source into a definition plus schema errors

use crate::core::definition::PipelineDefinition;
use std::fmt;
use std::path::PathBuf;

/// Where a pipeline definition comes from
#[derive(Debug, Clone)]
pub enum PipelineSource {
    File(PathBuf),
    Yaml(String),
    Definition(PipelineDefinition),
}

impl fmt::Display for PipelineSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineSource::File(path) => write!(f, "{}", path.display()),
            PipelineSource::Yaml(_) => f.write_str("<yaml>"),
            PipelineSource::Definition(definition) => {
                write!(f, "<{}>", definition.name.as_deref().unwrap_or("definition"))
            }
        }
    }
}

/// Result of an import; `definition` is `None` when the source could not be parsed
#[derive(Debug, Clone, Default)]
pub struct ImportedPipeline {
    pub definition: Option<PipelineDefinition>,
    pub errors: Vec<String>,
}

impl ImportedPipeline {
    pub fn is_valid(&self) -> bool {
        self.definition.is_some() && self.errors.is_empty()
    }
}

pub trait PipelineImporter: Send + Sync {
    fn import(&self, source: &PipelineSource) -> ImportedPipeline;
}

/// Default importer for YAML files and strings
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlImporter;

impl PipelineImporter for YamlImporter {
    fn import(&self, source: &PipelineSource) -> ImportedPipeline {
        let parsed = match source {
            PipelineSource::File(path) => PipelineDefinition::from_file(path),
            PipelineSource::Yaml(yaml) => PipelineDefinition::from_yaml(yaml),
            PipelineSource::Definition(definition) => Ok(definition.clone()),
        };

        match parsed {
            Ok(definition) => ImportedPipeline {
                errors: definition.schema_errors(),
                definition: Some(definition),
            },
            Err(e) => ImportedPipeline {
                definition: None,
                errors: vec![format!("{:#}", e)],
            },
        }
    }
}
