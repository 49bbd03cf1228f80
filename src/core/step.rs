//! Step domain model

use crate::core::{
    condition::Condition,
    error::DeployError,
    resource::ResourceDefinition,
};
use crate::execution::retry::RetrySpec;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use std::time::Duration;

/// An external command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,

    /// Whether running the command twice is harmless (e.g. `helm upgrade --install`)
    pub safe_to_repeat: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            safe_to_repeat: false,
        }
    }

    pub fn repeatable(mut self) -> Self {
        self.safe_to_repeat = true;
        self
    }

    /// Substitute `{{ name }}` placeholders, failing on any left unresolved
    pub fn resolve(&self, variables: &HashMap<String, String>) -> Result<CommandSpec, DeployError> {
        let mut resolved = self.clone();
        resolved.program = render_template(&self.program, variables)?;
        resolved.args = self
            .args
            .iter()
            .map(|a| render_template(a, variables))
            .collect::<Result<_, _>>()?;
        for value in resolved.env.values_mut() {
            *value = render_template(value, variables)?;
        }
        Ok(resolved)
    }

    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([\w.\-]+)\s*\}\}").expect("placeholder regex is valid"))
}

/// Render `{{ name }}` placeholders from `variables`
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> Result<String, DeployError> {
    let mut missing = Vec::new();
    let rendered = placeholder_regex().replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match variables.get(key) {
            Some(value) => value.clone(),
            None => {
                missing.push(key.to_string());
                caps[0].to_string()
            }
        }
    });
    if missing.is_empty() {
        Ok(rendered.into_owned())
    } else {
        Err(DeployError::Configuration(format!(
            "missing required variable(s): {}",
            missing.join(", ")
        )))
    }
}

fn render_json(value: &mut Value, variables: &HashMap<String, String>) -> Result<(), DeployError> {
    match value {
        Value::String(s) if s.contains("{{") => *s = render_template(s, variables)?,
        Value::Array(items) => {
            for item in items {
                render_json(item, variables)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                render_json(item, variables)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Render placeholders in every string field of a serializable value
pub fn resolve_templates<T>(item: &T, variables: &HashMap<String, String>) -> Result<T, DeployError>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(item)
        .map_err(|e| DeployError::Configuration(format!("cannot render template: {}", e)))?;
    render_json(&mut value, variables)?;
    serde_json::from_value(value)
        .map_err(|e| DeployError::Configuration(format!("rendered value is invalid: {}", e)))
}

/// What a step does
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Create-or-update the definitions, in order
    Apply {
        resources: Vec<ResourceDefinition>,
        /// Delete before applying (immutable resources such as jobs)
        recreate: bool,
    },

    /// Run an external command
    Command(CommandSpec),

    /// Block until a condition holds
    Wait(Condition),
}

impl StepAction {
    pub fn label(&self) -> &'static str {
        match self {
            StepAction::Apply { .. } => "apply",
            StepAction::Command(_) => "command",
            StepAction::Wait(_) => "wait",
        }
    }

    /// Whether re-running the action on retry is harmless
    pub fn is_repeatable(&self) -> bool {
        match self {
            StepAction::Apply { .. } | StepAction::Wait(_) => true,
            StepAction::Command(cmd) => cmd.safe_to_repeat,
        }
    }
}

/// A single step in a deployment plan
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Step IDs that must have succeeded first
    pub dependencies: Vec<String>,

    pub action: StepAction,

    /// Readiness gate evaluated after the action succeeds
    pub gate: Option<Condition>,

    /// Per-attempt limit for the action (gates have their own deadline)
    pub timeout: Duration,

    pub retry: Option<RetrySpec>,

    /// Endpoint discovery step: a gate timeout downgrades to a warning
    pub exposure: bool,

    /// Output key under which the gate's observed value is stored
    pub capture: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        let id = id.into();
        Step {
            name: id.clone(),
            id,
            dependencies: Vec::new(),
            action,
            gate: None,
            timeout: StepDefaults::default().timeout,
            retry: None,
            exposure: false,
            capture: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn after<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn gated(mut self, condition: Condition) -> Self {
        self.gate = Some(condition);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetrySpec) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Mark as the endpoint discovery step, storing the discovered value under `key`
    pub fn exposing(mut self, key: impl Into<String>) -> Self {
        self.exposure = true;
        self.capture = Some(key.into());
        self
    }

    pub fn capturing(mut self, key: impl Into<String>) -> Self {
        self.capture = Some(key.into());
        self
    }

    /// Check if all dependencies are in the succeeded set
    pub fn dependencies_met(&self, succeeded: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| succeeded.contains(dep))
    }

    /// The condition this step ends up waiting on, if any
    pub fn readiness_condition(&self) -> Option<&Condition> {
        match &self.action {
            StepAction::Wait(condition) => Some(condition),
            _ => self.gate.as_ref(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub timeout: Duration,
    pub retry: Option<RetrySpec>,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300), // 5 minutes
            retry: None,
        }
    }
}
