//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{DescribeCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Run CI/CD pipelines defined in YAML
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline")]
#[command(version)]
#[command(about = "Run CI/CD pipelines defined in YAML", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline, optionally followed by a teardown pipeline
    Run(RunCommand),

    /// Validate a pipeline definition without running it
    Validate(ValidateCommand),

    /// Print the step tree of a pipeline
    Describe(DescribeCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
