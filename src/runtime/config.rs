//! Runtime executor configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How step commands are executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Run commands through a shell on the host, inside the pipeline workspace
    #[default]
    Host,
    /// Run each step in a container through the docker CLI
    Docker,
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Host => f.write_str("host"),
            RuntimeMode::Docker => f.write_str("docker"),
        }
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(RuntimeMode::Host),
            "docker" => Ok(RuntimeMode::Docker),
            other => Err(format!("unknown runtime '{}', expected host or docker", other)),
        }
    }
}

/// Configuration for the process runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub mode: RuntimeMode,

    /// Shell used for `commands` when the step does not name one
    pub shell: String,

    /// Path to the docker executable
    pub docker_path: String,

    /// Image used in docker mode for steps that only define commands
    pub default_image: String,

    /// Ceiling for a single foreground process, in seconds
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Host,
            shell: "sh".to_string(),
            docker_path: "docker".to_string(),
            default_image: "alpine:3".to_string(),
            timeout_secs: 10800,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: RuntimeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_docker_path(mut self, docker_path: impl Into<String>) -> Self {
        self.docker_path = docker_path.into();
        self
    }

    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}
