//! Pipeline environment - ordered variables, `$$name` substitution and secret redaction

use crate::core::error::PipelineError;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Replacement written over every secret value by [`Environment::redact`]
pub const REDACTED: &str = "********";

/// Kind of a pipeline variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    Environment,
    Secret,
    Internal,
}

/// A single named variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type", default)]
    pub kind: VariableType,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            kind: VariableType::Environment,
        }
    }

    pub fn secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: VariableType::Secret,
            ..Self::new(name, value)
        }
    }

    pub fn internal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: VariableType::Internal,
            ..Self::new(name, value)
        }
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\$\$([\w.\-]+)").expect("token pattern is valid"))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `input` still holds a `$$token` after substitution
pub fn has_unresolved_tokens(input: &str) -> bool {
    token_regex().is_match(input)
}

/// Ordered variable store owned by one pipeline
#[derive(Debug, Clone, Default)]
pub struct Environment {
    variables: Vec<Variable>,
    index: HashMap<String, usize>,
    secrets: Option<Regex>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a variable (last write wins, position is kept)
    pub fn add_variable(&mut self, variable: Variable) -> Result<(), PipelineError> {
        if variable.name.trim().is_empty() {
            return Err(PipelineError::validation(
                "environment variable requires a name",
            ));
        }

        let touches_secrets = variable.kind == VariableType::Secret
            || self
                .index
                .get(&variable.name)
                .is_some_and(|&i| self.variables[i].kind == VariableType::Secret);

        match self.index.get(&variable.name) {
            Some(&i) => self.variables[i] = variable,
            None => {
                self.index.insert(variable.name.clone(), self.variables.len());
                self.variables.push(variable);
            }
        }

        if touches_secrets {
            self.rebuild_secrets();
        }
        Ok(())
    }

    /// Copy of the stored entry
    pub fn get_variable(&self, name: &str) -> Option<Variable> {
        self.index.get(name).map(|&i| self.variables[i].clone())
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.index.get(name).map(|&i| self.variables[i].value.as_str())
    }

    /// Variable names in insertion order, optionally filtered by type
    pub fn list_variables(&self, kind: Option<VariableType>) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| kind.map_or(true, |k| v.kind == k))
            .map(|v| v.name.clone())
            .collect()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Replace every `$$name` whose name is registered and not followed by a word character.
    ///
    /// Unknown tokens are left verbatim and replacement values are not re-scanned.
    pub fn substitute(&self, input: &str) -> String {
        if !input.contains("$$") {
            return input.to_string();
        }

        token_regex()
            .replace_all(input, |caps: &Captures<'_>| {
                let token = &caps[1];
                match self.longest_registered_prefix(token) {
                    Some((len, value)) => format!("{}{}", value, &token[len..]),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }

    /// Longest variable name `n` with `token == n` or `token = n + <non-word char> + ...`
    fn longest_registered_prefix(&self, token: &str) -> Option<(usize, &str)> {
        let mut cuts: Vec<usize> = token
            .char_indices()
            .filter(|(_, c)| !is_word_char(*c))
            .map(|(i, _)| i)
            .collect();
        cuts.push(token.len());

        cuts.iter()
            .rev()
            .filter(|&&cut| cut > 0)
            .find_map(|&cut| self.value(&token[..cut]).map(|value| (cut, value)))
    }

    /// Mask every literal occurrence of a registered secret value
    pub fn redact(&self, input: &str) -> String {
        match &self.secrets {
            Some(pattern) => pattern.replace_all(input, REDACTED).into_owned(),
            None => input.to_string(),
        }
    }

    fn rebuild_secrets(&mut self) {
        let mut values: Vec<&str> = self
            .variables
            .iter()
            .filter(|v| v.kind == VariableType::Secret && !v.value.trim().is_empty())
            .map(|v| v.value.as_str())
            .collect();

        if values.is_empty() {
            self.secrets = None;
            return;
        }

        // Longest first so a secret that contains another is masked whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));
        let alternation = values
            .iter()
            .map(|v| regex::escape(v))
            .collect::<Vec<_>>()
            .join("|");
        self.secrets = Regex::new(&alternation).ok();
    }
}
