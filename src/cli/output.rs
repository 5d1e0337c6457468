//! CLI output formatting

use crate::core::{NodeDescription, NodeType, PipelineStatus, StepStatus};
use crate::execution::SequenceDescription;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

const DEFAULT_WIDTH: usize = 80;

/// Create a spinner for a running pipeline
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(template);
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Horizontal rule across the terminal
pub fn separator() -> String {
    let width = term_size::dimensions()
        .map(|(w, _)| w)
        .unwrap_or(DEFAULT_WIDTH)
        .min(DEFAULT_WIDTH * 2);
    style("─".repeat(width)).dim().to_string()
}

/// Format a pipeline status for display
pub fn format_status(status: PipelineStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        PipelineStatus::Ready | PipelineStatus::Loaded => style(label).dim().to_string(),
        PipelineStatus::Initializing | PipelineStatus::Running => style(label).yellow().to_string(),
        PipelineStatus::Paused => style(label).blue().to_string(),
        PipelineStatus::Failed => style(label).red().to_string(),
        PipelineStatus::Skipped => style(label).dim().to_string(),
        PipelineStatus::Successful => style(label).green().to_string(),
    }
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    let label = status.as_str().to_uppercase();
    match status {
        StepStatus::Ready | StepStatus::Skipped => style(label).dim().to_string(),
        StepStatus::Running => style(label).yellow().to_string(),
        StepStatus::Failed => style(label).red().to_string(),
        StepStatus::Successful => style(label).green().to_string(),
    }
}

fn status_icon(status: StepStatus) -> String {
    match status {
        StepStatus::Successful => CHECK.to_string(),
        StepStatus::Failed => CROSS.to_string(),
        StepStatus::Running => SPINNER.to_string(),
        StepStatus::Skipped => SKIP.to_string(),
        StepStatus::Ready => "  ".to_string(),
    }
}

/// Render a node tree, one line per node, children indented
pub fn format_tree(node: &NodeDescription) -> String {
    let mut lines = Vec::new();
    render_node(node, 0, &mut lines);
    lines.join("\n")
}

fn render_node(node: &NodeDescription, depth: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    let name = match node.node_type {
        NodeType::Step => node.name.clone(),
        NodeType::Steps if node.parallel == Some(true) => {
            format!("{} {}", style(&node.name).bold(), style("(parallel)").dim())
        }
        NodeType::Steps => style(&node.name).bold().to_string(),
    };
    lines.push(format!(
        "{}{}{} {}",
        indent,
        status_icon(node.status),
        name,
        format_step_status(node.status)
    ));
    for child in node.steps.iter().flatten() {
        render_node(child, depth + 1, lines);
    }
}

/// Render a pipeline snapshot: header line, then its step tree
pub fn format_sequence(description: &SequenceDescription) -> String {
    let mut out = format!(
        "{} {} ({}) {}",
        ROCKET,
        style(&description.name).bold(),
        style(&description.id.to_string()[..8]).dim(),
        format_status(description.status)
    );
    if let Some(breakpoint) = &description.breakpoint {
        out.push_str(&format!(" at {}", style(breakpoint).cyan()));
    }
    if let (Some(started), Some(finished)) = (
        description.timestamps.started_at,
        description.timestamps.finished_at,
    ) {
        let elapsed = (finished - started).to_std().unwrap_or_default();
        out.push_str(&format!(" in {}", format_duration(elapsed)));
    }
    if let Some(sequence) = &description.sequence {
        // The root group is implicit; list its children at the top level
        for child in sequence.steps.iter().flatten() {
            out.push('\n');
            let mut lines = Vec::new();
            render_node(child, 1, &mut lines);
            out.push_str(&lines.join("\n"));
        }
    }
    out
}

/// Format a duration as `1h 2m 3s`, `2m 3s` or `1.25s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}
