//! Pipeline definition as loaded from YAML

use crate::core::environment::{has_unresolved_tokens, Environment, Variable, VariableType};
use anyhow::{Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;

/// Accept a YAML scalar (string, number or bool) as its string form.
///
/// Numeric fields such as `loop` or `timeout` may hold `$$VAR` tokens,
/// so they are kept as strings until the environment is applied.
fn scalar<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_to_string(&value)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("expected a scalar, found {:?}", value))),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a duration in seconds ("5", "0.25", 5)
pub fn parse_seconds(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Upper bound on `loop`; iterations are materialized as tree nodes
pub const MAX_LOOP_ITERATIONS: u64 = 10_000;

/// Parse a non-negative whole number ("3", "3.0", 3)
pub fn parse_count(value: &str) -> Option<u64> {
    let value = value.trim();
    value.parse::<u64>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
            .map(|f| f as u64)
    })
}

/// Top-level pipeline definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Pipeline-wide variables
    #[serde(default)]
    pub environment: Vec<VariableDefinition>,

    /// Image registries steps may refer to by name
    #[serde(default)]
    pub registries: Vec<RegistryDefinition>,

    /// Children of the root group
    #[serde(default)]
    pub steps: Vec<NodeDefinition>,
}

/// Variable entry in the pipeline's `environment` list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDefinition {
    pub name: String,
    #[serde(default, deserialize_with = "scalar")]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: VariableType,
}

/// Named image registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryDefinition {
    pub name: String,
    pub url: String,
}

/// A tree node: a group when it has `steps`, a step otherwise
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NodeDefinition {
    Group(GroupDefinition),
    Step(StepDefinition),
}

impl<'de> Deserialize<'de> for NodeDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let is_group = value
            .as_mapping()
            .is_some_and(|mapping| mapping.contains_key("steps"));

        if is_group {
            serde_yaml::from_value(value)
                .map(NodeDefinition::Group)
                .map_err(D::Error::custom)
        } else {
            serde_yaml::from_value(value)
                .map(NodeDefinition::Step)
                .map_err(D::Error::custom)
        }
    }
}

impl NodeDefinition {
    pub fn name(&self) -> &str {
        match self {
            NodeDefinition::Group(group) => &group.name,
            NodeDefinition::Step(step) => &step.name,
        }
    }
}

/// Ordered group of nodes, serial unless `parallel`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct GroupDefinition {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub parallel: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Vec<Condition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDefinition>,

    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    pub steps: Vec<NodeDefinition>,
}

/// Leaf unit of work
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StepDefinition {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Command lines handed to the runtime (the container arguments)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Vec<EnvironmentEntry>>,

    /// `source:target` mounts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    /// Name of an entry in the pipeline's `registries`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(
        rename = "loop",
        default,
        deserialize_with = "scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub loop_count: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<ForEach>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_variable: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_variable: Option<String>,

    /// Only meaningful with `loop`/`for-each`: run the iterations in parallel
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parallel: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Vec<Condition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryDefinition>,

    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_fail: bool,

    /// Do not wait for the step to exit
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub background: bool,

    /// Finish status code filled in by the runtime executor
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Step-level environment entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentEntry {
    pub name: String,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Used when `value` still has unresolved `$$` tokens after substitution
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl EnvironmentEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            default: None,
        }
    }
}

/// Retry policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryDefinition {
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub iterations: Option<String>,
    /// Seconds to sleep between failed attempts
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub backoff: Option<String>,
}

/// `for-each` input: a list, a comma separated string, or a single value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ForEach {
    List(Vec<String>),
    Text(String),
}

impl<'de> Deserialize<'de> for ForEach {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    scalar_to_string(item).ok_or_else(|| {
                        D::Error::custom(format!("for-each items must be scalars, found {:?}", item))
                    })
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(ForEach::List),
            other => scalar_to_string(&other)
                .map(ForEach::Text)
                .ok_or_else(|| D::Error::custom("for-each must be a list or a string")),
        }
    }
}

impl ForEach {
    fn substitute(&self, env: &Environment) -> ForEach {
        match self {
            ForEach::List(items) => ForEach::List(items.iter().map(|i| env.substitute(i)).collect()),
            ForEach::Text(text) => ForEach::Text(env.substitute(text)),
        }
    }

    pub fn has_unresolved_tokens(&self) -> bool {
        match self {
            ForEach::List(items) => items.iter().any(|i| has_unresolved_tokens(i)),
            ForEach::Text(text) => has_unresolved_tokens(text),
        }
    }

    /// Iteration values with empty elements dropped
    pub fn elements(&self) -> Vec<String> {
        let raw: Vec<String> = match self {
            ForEach::List(items) => items.clone(),
            ForEach::Text(text) => text.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }
}

/// One `when` clause
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
    /// Sub-clauses for `AND` / `OR`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Pattern separator for `MATCHES` / `NOT_MATCHES` (default `,`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
}

impl Condition {
    pub fn new(operator: &str, value: &str, other: &str) -> Self {
        Self {
            operator: Some(operator.to_string()),
            value: Some(value.to_string()),
            other: Some(other.to_string()),
            ..Self::default()
        }
    }
}

impl PipelineDefinition {
    /// Load a pipeline definition from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse a pipeline definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let definition: PipelineDefinition =
            serde_yaml::from_str(yaml).context("Invalid pipeline definition")?;
        Ok(definition)
    }

    /// Pipeline-level schema errors (node-level errors are collected on the tree)
    pub fn schema_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("pipeline defines no steps".to_string());
        }

        for variable in &self.environment {
            if variable.name.trim().is_empty() {
                errors.push("environment variable requires a name".to_string());
            } else if variable.value.is_none() {
                errors.push(format!(
                    "environment variable '{}' requires a value",
                    variable.name
                ));
            }
        }

        let mut seen = HashSet::new();
        for registry in &self.registries {
            if registry.name.trim().is_empty() || registry.url.trim().is_empty() {
                errors.push("registry requires a name and a url".to_string());
            } else if !seen.insert(registry.name.as_str()) {
                errors.push(format!("duplicate registry '{}'", registry.name));
            }
        }

        errors
    }

    /// Pipeline variables ready to be added to an [`Environment`]
    pub fn variables(&self) -> Vec<Variable> {
        self.environment
            .iter()
            .filter_map(|v| {
                v.value.as_ref().map(|value| Variable {
                    name: v.name.clone(),
                    value: value.clone(),
                    kind: v.kind,
                })
            })
            .collect()
    }
}

fn check_timeout(label: &str, timeout: Option<&String>, errors: &mut Vec<String>) {
    if let Some(timeout) = timeout {
        if !has_unresolved_tokens(timeout) && !parse_seconds(timeout).is_some_and(|t| t > 0.0) {
            errors.push(format!("{}: timeout must be a positive number of seconds, got '{}'", label, timeout));
        }
    }
}

fn check_retry(label: &str, retry: Option<&RetryDefinition>, errors: &mut Vec<String>) {
    let Some(retry) = retry else {
        return;
    };

    match &retry.iterations {
        None => errors.push(format!("{}: retry requires iterations", label)),
        Some(iterations) if !has_unresolved_tokens(iterations) => {
            if !parse_count(iterations).is_some_and(|n| n >= 1) {
                errors.push(format!(
                    "{}: retry iterations must be a positive integer, got '{}'",
                    label, iterations
                ));
            }
        }
        Some(_) => {}
    }

    if let Some(backoff) = &retry.backoff {
        if !has_unresolved_tokens(backoff) && parse_seconds(backoff).is_none() {
            errors.push(format!(
                "{}: retry backoff must be a non-negative number of seconds, got '{}'",
                label, backoff
            ));
        }
    }
}

impl GroupDefinition {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.steps.is_empty() {
            errors.push(format!("group '{}': has no steps", self.name));
        }
        errors.extend(self.validate_settings());
        errors
    }

    /// Checks on `timeout` and `retry` only
    pub fn validate_settings(&self) -> Vec<String> {
        let label = format!("group '{}'", self.name);
        let mut errors = Vec::new();
        check_timeout(&label, self.timeout.as_ref(), &mut errors);
        check_retry(&label, self.retry.as_ref(), &mut errors);
        errors
    }
}

impl StepDefinition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Definition errors; values that still hold `$$` tokens are checked once substituted
    pub fn validate(&self, registries: &[RegistryDefinition]) -> Vec<String> {
        let label = format!("step '{}'", self.name);
        let mut errors = Vec::new();

        if self.loop_count.is_some() && self.for_each.is_some() {
            errors.push(format!("{}: loop and for-each are mutually exclusive", label));
        }
        if self.for_each.is_some() && self.element_variable.is_none() {
            errors.push(format!("{}: for-each requires element-variable", label));
        }
        if self.loop_count.is_some() && self.retry.is_some() {
            errors.push(format!("{}: loop cannot be combined with retry", label));
        }

        if let Some(count) = &self.loop_count {
            // Non-numeric text is tolerated and simply yields no iterations
            if let Ok(n) = count.trim().parse::<f64>() {
                if n < 0.0 || n.fract() != 0.0 {
                    errors.push(format!("{}: loop must be a whole number, got '{}'", label, count));
                } else if n > MAX_LOOP_ITERATIONS as f64 {
                    errors.push(format!(
                        "{}: loop must be at most {}, got '{}'",
                        label, MAX_LOOP_ITERATIONS, count
                    ));
                }
            }
        }

        check_retry(&label, self.retry.as_ref(), &mut errors);
        check_timeout(&label, self.timeout.as_ref(), &mut errors);

        if self.image.is_none() && self.commands.is_empty() {
            errors.push(format!("{}: requires an image or commands", label));
        }

        if let Some(registry) = &self.registry {
            if !has_unresolved_tokens(registry) && !registries.iter().any(|r| &r.name == registry) {
                errors.push(format!("{}: unknown registry '{}'", label, registry));
            }
        }

        if let Some(entries) = &self.environment {
            if entries.iter().any(|e| e.name.trim().is_empty()) {
                errors.push(format!("{}: environment entries require a name", label));
            }
        }

        errors
    }

    /// Resolve `$$` tokens in `loop` and `for-each` only
    pub fn substitute_iteration_source(&mut self, env: &Environment) {
        self.loop_count = self.loop_count.as_ref().map(|v| env.substitute(v));
        self.for_each = self.for_each.as_ref().map(|f| f.substitute(env));
    }

    /// Substitute `$$` tokens across the definition, resolve the registry
    /// and make sure `environment` and `volumes` exist.
    pub fn apply_environment(&mut self, env: &Environment, registries: &[RegistryDefinition]) {
        let scoped = self.resolve_environment(env);

        let volumes = self.volumes.get_or_insert_with(Vec::new);
        for volume in volumes.iter_mut() {
            *volume = scoped.substitute(volume);
        }

        for command in self.commands.iter_mut() {
            *command = scoped.substitute(command);
        }
        for port in self.ports.iter_mut() {
            *port = scoped.substitute(port);
        }

        let substitute = |field: &mut Option<String>| {
            if let Some(value) = field.as_mut() {
                *value = scoped.substitute(value);
            }
        };
        substitute(&mut self.image);
        substitute(&mut self.hostname);
        substitute(&mut self.loop_count);
        substitute(&mut self.timeout);
        substitute(&mut self.registry);
        if let Some(retry) = self.retry.as_mut() {
            substitute(&mut retry.iterations);
            substitute(&mut retry.backoff);
        }

        self.resolve_registry(registries);
    }

    /// Pipeline environment overlaid with the step's own entries
    pub fn scoped_environment(&self, env: &Environment) -> Environment {
        self.clone().resolve_environment(env)
    }

    /// Substitute the step's entry values in place and return the scoped environment
    fn resolve_environment(&mut self, env: &Environment) -> Environment {
        let mut scoped = env.clone();

        for entry in self.environment.get_or_insert_with(Vec::new).iter_mut() {
            let mut value = entry.value.as_ref().map(|v| scoped.substitute(v));
            if value.as_deref().map_or(true, has_unresolved_tokens) {
                if let Some(default) = &entry.default {
                    value = Some(scoped.substitute(default));
                }
            }
            if let Some(value) = &value {
                // Later entries and the step's fields may refer to earlier entries
                scoped
                    .add_variable(Variable::internal(entry.name.clone(), value.clone()))
                    .ok();
            }
            entry.value = value;
        }

        scoped
    }

    fn resolve_registry(&mut self, registries: &[RegistryDefinition]) {
        let (Some(name), Some(image)) = (&self.registry, &self.image) else {
            return;
        };
        if let Some(registry) = registries.iter().find(|r| &r.name == name) {
            let url = registry.url.trim_end_matches('/');
            if !image.starts_with(url) {
                self.image = Some(format!("{}/{}", url, image));
            }
        }
    }

    /// Synthetic definition for one `loop`/`for-each` iteration (`index` is 0-based)
    pub fn iteration(&self, index: usize, element: Option<&str>) -> StepDefinition {
        let mut clone = self.clone();
        clone.name = format!("{}-{}", self.name, index + 1);
        clone.loop_count = None;
        clone.for_each = None;
        clone.parallel = false;
        clone.when = None;

        let entries = clone.environment.get_or_insert_with(Vec::new);
        if let (Some(variable), Some(element)) = (&self.element_variable, element) {
            entries.push(EnvironmentEntry::new(variable.clone(), element));
        }
        if let Some(variable) = &self.counter_variable {
            entries.push(EnvironmentEntry::new(variable.clone(), (index + 1).to_string()));
        }
        clone
    }

    /// Names declared in the step's own `environment`
    pub fn environment_keys(&self) -> impl Iterator<Item = &str> {
        self.environment
            .iter()
            .flatten()
            .map(|entry| entry.name.as_str())
    }
}
