//! Execution state models

use crate::core::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Overall pipeline status
///
/// `ready --load--> loaded --start--> initializing --> running --> {successful | failed}`,
/// with `running <--> paused` any number of times and `skipped` reached through
/// chain short-circuit or `kill()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    /// Created, definition not loaded yet
    Ready,
    /// Definition loaded and validated
    Loaded,
    /// Runtime executor is being prepared
    Initializing,
    /// Tree walk in progress
    Running,
    /// Stopped at a breakpoint (or paused by a caller)
    Paused,
    /// A step failed or the definition was invalid
    Failed,
    /// Killed, or short-circuited by a failed predecessor in a chain
    Skipped,
    /// Every node completed
    Successful,
}

impl PipelineStatus {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Failed | PipelineStatus::Skipped | PipelineStatus::Successful
        )
    }

    /// States that hold runtime resources and need cleanup
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Initializing | PipelineStatus::Running | PipelineStatus::Paused
        )
    }

    /// States from which `start()` may be called
    pub fn is_startable(&self) -> bool {
        matches!(self, PipelineStatus::Ready | PipelineStatus::Loaded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Ready => "ready",
            PipelineStatus::Loaded => "loaded",
            PipelineStatus::Initializing => "initializing",
            PipelineStatus::Running => "running",
            PipelineStatus::Paused => "paused",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Skipped => "skipped",
            PipelineStatus::Successful => "successful",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(PipelineStatus::Ready),
            "loaded" => Ok(PipelineStatus::Loaded),
            "initializing" => Ok(PipelineStatus::Initializing),
            "running" => Ok(PipelineStatus::Running),
            "paused" => Ok(PipelineStatus::Paused),
            "failed" => Ok(PipelineStatus::Failed),
            "skipped" => Ok(PipelineStatus::Skipped),
            "successful" => Ok(PipelineStatus::Successful),
            other => Err(PipelineError::UnknownStatus(other.to_string())),
        }
    }
}

/// Status of a single step (groups derive theirs from their children)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Ready,
    Running,
    Failed,
    Successful,
    Skipped,
}

impl StepStatus {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Failed | StepStatus::Successful | StepStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Ready => "ready",
            StepStatus::Running => "running",
            StepStatus::Failed => "failed",
            StepStatus::Successful => "successful",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ready" => Ok(StepStatus::Ready),
            "running" => Ok(StepStatus::Running),
            "failed" => Ok(StepStatus::Failed),
            "successful" => Ok(StepStatus::Successful),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(PipelineError::UnknownStatus(other.to_string())),
        }
    }
}

/// Pipeline flavour inside a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Skipped once an earlier pipeline in the chain fails
    #[default]
    Standard,
    /// Always runs, whatever happened before it
    Teardown,
}

/// Tree node type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Step,
    Steps,
}
