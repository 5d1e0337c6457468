//! `when` clause evaluation

use crate::core::definition::Condition;
use crate::core::environment::Environment;
use regex::Regex;
use std::path::Path;
use tracing::{error, warn};

const DEFAULT_DELIMITER: &str = ",";

/// Evaluates `when` clauses against an environment and a workspace
pub struct ConditionEvaluator<'a> {
    environment: &'a Environment,
    workspace: &'a Path,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(environment: &'a Environment, workspace: &'a Path) -> Self {
        Self {
            environment,
            workspace,
        }
    }

    /// True when every clause passes
    pub fn all(&self, conditions: &[Condition]) -> bool {
        conditions.iter().all(|condition| self.evaluate(condition))
    }

    /// Evaluate one clause; a missing or unknown operator counts as failed
    pub fn evaluate(&self, condition: &Condition) -> bool {
        match self.check(condition) {
            Some(result) => result,
            None => {
                warn!(
                    "Condition has an unknown or missing operator: {:?}",
                    condition.operator
                );
                false
            }
        }
    }

    fn operand(&self, value: Option<&String>) -> String {
        value
            .map(|v| self.environment.substitute(v))
            .unwrap_or_default()
    }

    fn check(&self, condition: &Condition) -> Option<bool> {
        let operator = condition.operator.as_deref()?.trim().to_ascii_uppercase();
        let value = self.operand(condition.value.as_ref());
        let other = self.operand(condition.other.as_ref());

        let result = match operator.as_str() {
            "EQ" => value == other,
            "NEQ" => value != other,
            "GT" => compare(&value, &other, |a, b| a > b),
            "GTE" => compare(&value, &other, |a, b| a >= b),
            "LT" => compare(&value, &other, |a, b| a < b),
            "LTE" => compare(&value, &other, |a, b| a <= b),
            "IS_SET" => is_set(condition.value.as_ref(), &value),
            "IS_NOT_SET" => !is_set(condition.value.as_ref(), &value),
            "INCLUDES" => includes(&value, &other),
            "NOT_INCLUDES" => !includes(&value, &other),
            "STARTS_WITH" => value.starts_with(&other),
            "ENDS_WITH" => value.ends_with(&other),
            "MATCHES" => self.matches(condition, &value, &other),
            "NOT_MATCHES" => !self.matches(condition, &value, &other),
            "EXISTS" => self.exists(&value),
            "NOT_EXISTS" => !self.exists(&value),
            "AND" => self.combine(condition, true),
            "OR" => self.combine(condition, false),
            _ => return None,
        };
        Some(result)
    }

    /// `AND` needs every sub-clause, `OR` any; an unknown operator fails its branch
    fn combine(&self, condition: &Condition, every: bool) -> bool {
        let mut results = condition.conditions.iter().map(|sub| match self.check(sub) {
            Some(result) => result,
            None => {
                error!(
                    "Unknown operator {:?} inside {} clause",
                    sub.operator,
                    if every { "AND" } else { "OR" }
                );
                false
            }
        });

        if every {
            !condition.conditions.is_empty() && results.all(|r| r)
        } else {
            results.any(|r| r)
        }
    }

    /// Full-value match against any of the delimited patterns in `other`
    fn matches(&self, condition: &Condition, value: &str, patterns: &str) -> bool {
        let delimiter = condition
            .delimiter
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_DELIMITER);

        patterns
            .split(delimiter)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .any(|pattern| match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(re) => re.is_match(value),
                Err(e) => {
                    warn!("Invalid pattern '{}' in condition: {}", pattern, e);
                    false
                }
            })
    }

    fn exists(&self, path: &str) -> bool {
        if path.is_empty() {
            return false;
        }
        self.workspace.join(path).exists()
    }
}

fn compare(value: &str, other: &str, op: impl Fn(f64, f64) -> bool) -> bool {
    match (value.trim().parse::<f64>(), other.trim().parse::<f64>()) {
        (Ok(a), Ok(b)) => op(a, b),
        _ => false,
    }
}

/// Set means present, non-empty and fully substituted
fn is_set(raw: Option<&String>, substituted: &str) -> bool {
    raw.is_some()
        && !substituted.is_empty()
        && !crate::core::environment::has_unresolved_tokens(substituted)
}

fn includes(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return haystack.is_empty();
    }
    haystack.contains(needle)
}
