//! CLI command definitions

use crate::runtime::RuntimeMode;
use clap::Args;
use std::path::PathBuf;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Pipeline to run after the main one, even when it fails
    #[arg(short, long)]
    pub teardown: Option<String>,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub var: Vec<(String, String)>,

    /// Secret variables (key=value), redacted from output
    #[arg(long, value_parser = parse_key_value)]
    pub secret: Vec<(String, String)>,

    /// Pause when this step or group finishes
    #[arg(long, conflicts_with = "step")]
    pub break_at: Option<String>,

    /// Run one step at a time, waiting for Enter in between
    #[arg(long)]
    pub step: bool,

    /// Where step commands run
    #[arg(long, default_value_t = RuntimeMode::Host)]
    pub runtime: RuntimeMode,

    /// Workspace directory shared by the steps
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,

    /// Print the final step tree as JSON
    #[arg(long)]
    pub json: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Describe a pipeline's step tree
#[derive(Debug, Args, Clone)]
pub struct DescribeCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].trim().is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].trim().to_string(), parts[1].to_string()))
}
