//! Scenario-based tests for pipeline-engine

mod breakpoints;
mod chaining;
mod conditions;
mod failure_handling;
mod loops;
