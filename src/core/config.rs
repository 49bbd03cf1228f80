//! Deployment configuration from YAML

use crate::core::{
    condition::Condition,
    error::ErrorKind,
    pipeline::DeploymentPlan,
    resource::{ResourceDefinition, ResourceKind},
    step::{CommandSpec, Step, StepAction, StepDefaults},
};
use crate::execution::retry::{Backoff, RetrySpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Variable definition - can be a simple string or a file reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableDefinition {
    /// Simple string value
    String(String),
    /// File reference with validation flag
    File { path: String, validate_exists: bool },
}

impl VariableDefinition {
    /// Value substituted for `{{ name }}`; files render as their path
    pub fn render_value(&self) -> String {
        match self {
            VariableDefinition::String(s) => s.clone(),
            VariableDefinition::File { path, .. } => path.clone(),
        }
    }
}

/// Top-level deployment configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Plan name
    pub name: String,

    /// Namespace for resources that do not name one
    #[serde(default)]
    pub namespace: Option<String>,

    /// Variables available to all steps
    #[serde(default)]
    variables: HashMap<String, Value>,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    pub steps: Vec<StepConfig>,
}

/// Plan-wide step defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Default per-attempt timeout (in seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Retry policy for steps that do not set one
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    #[serde(default)]
    pub name: Option<String>,

    /// List of step IDs this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(flatten)]
    pub action: ActionConfig,

    /// Readiness condition checked after the action
    #[serde(default)]
    pub gate: Option<Condition>,

    /// Timeout for this step (overrides default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Retry policy for this step (overrides default)
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Endpoint discovery step
    #[serde(default)]
    pub exposure: bool,

    /// Output key for the value the gate discovers
    #[serde(default)]
    pub capture: Option<String>,
}

/// The step's action, keyed by its type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionConfig {
    Apply {
        resources: Vec<ResourceDefinition>,
        #[serde(default)]
        recreate: bool,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
        #[serde(default)]
        safe_to_repeat: bool,
    },
    Wait(Condition),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    #[default]
    Exponential,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: BackoffKind,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default)]
    pub jitter: bool,

    /// Error kinds to retry; empty means infrastructure errors only
    #[serde(default)]
    pub retry_on: Vec<ErrorKind>,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetryConfig {
    pub fn to_spec(&self) -> RetrySpec {
        let base = Duration::from_millis(self.base_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Exponential => Backoff::Exponential {
                base,
                max: Duration::from_millis(self.max_delay_ms),
                jitter: self.jitter,
            },
        };
        let spec = RetrySpec::new(self.max_attempts, backoff);
        if self.retry_on.is_empty() {
            spec
        } else {
            spec.retry_on(self.retry_on.iter().copied())
        }
    }
}

impl DeploymentConfig {
    /// Load deployment configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse deployment configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DeploymentConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the deployment configuration
    pub fn validate(&self) -> Result<()> {
        // Check that all step IDs are unique
        let mut seen_ids = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
        }

        // Check that all dependencies reference existing steps
        let step_ids: std::collections::HashSet<_> = self.steps.iter().map(|s| &s.id).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !step_ids.contains(dep) {
                    anyhow::bail!("Step '{}' depends on non-existent step '{}'", step.id, dep);
                }
            }

            if let Some(retry) = step.retry.as_ref().or(self.defaults.retry.as_ref()) {
                if retry.max_attempts == 0 {
                    anyhow::bail!("Step '{}' retry max_attempts must be at least 1", step.id);
                }
            }

            if let ActionConfig::Apply { resources, .. } = &step.action {
                if resources.is_empty() {
                    anyhow::bail!("Step '{}' applies no resources", step.id);
                }
            }

            if step.exposure && step.gate.is_none() && !matches!(step.action, ActionConfig::Wait(_)) {
                anyhow::bail!("Exposure step '{}' needs a gate to discover the endpoint", step.id);
            }

            let wait = match &step.action {
                ActionConfig::Wait(condition) => Some(condition),
                _ => None,
            };
            for condition in wait.into_iter().chain(step.gate.as_ref()) {
                if condition.poll_interval.is_zero() {
                    anyhow::bail!("Step '{}' polls {} with a zero interval", step.id, condition);
                }
            }
        }

        // Validate file existence for variables with validate_exists: true
        for (var_name, var_def) in self.get_variables() {
            if let VariableDefinition::File { path, validate_exists } = &var_def {
                if *validate_exists && !Path::new(path).exists() {
                    anyhow::bail!("Variable '{}' references file that doesn't exist: {}", var_name, path);
                }
            }
        }

        self.check_cycles()?;

        Ok(())
    }

    /// Check for cycles in the step dependency graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = std::collections::HashSet::new();
        let mut recursion_stack = std::collections::HashSet::new();

        for step in &self.steps {
            if !visited.contains(&step.id) {
                self.dfs_check(&step.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        step_id: &str,
        visited: &mut std::collections::HashSet<String>,
        recursion_stack: &mut std::collections::HashSet<String>,
    ) -> Result<()> {
        visited.insert(step_id.to_string());
        recursion_stack.insert(step_id.to_string());

        if let Some(step) = self.steps.iter().find(|s| s.id == step_id) {
            for dep in &step.depends_on {
                if recursion_stack.contains(dep) {
                    anyhow::bail!("Cycle detected in dependency graph involving step '{}'", dep);
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(step_id);
        Ok(())
    }

    /// Get variables as parsed VariableDefinition enum
    pub fn get_variables(&self) -> HashMap<String, VariableDefinition> {
        let mut vars = HashMap::new();

        for (key, value) in &self.variables {
            let var_def = match value {
                Value::String(s) => VariableDefinition::String(s.clone()),
                Value::Mapping(map) => {
                    // { path: "...", validate_exists: true/false }
                    let path = map
                        .get(Value::String("path".to_string()))
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();

                    let validate_exists = map
                        .get(Value::String("validate_exists".to_string()))
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);

                    VariableDefinition::File { path, validate_exists }
                }
                Value::Number(n) => VariableDefinition::String(n.to_string()),
                Value::Bool(b) => VariableDefinition::String(b.to_string()),
                _ => VariableDefinition::String(
                    serde_yaml::to_string(value).unwrap_or_default().trim().to_string(),
                ),
            };
            vars.insert(key.clone(), var_def);
        }

        vars
    }

    /// Get variables as string map
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.get_variables()
            .iter()
            .map(|(k, v)| (k.clone(), v.render_value()))
            .collect()
    }

    fn step_defaults(&self) -> StepDefaults {
        let mut defaults = StepDefaults::default();
        if let Some(secs) = self.defaults.timeout_secs {
            defaults.timeout = Duration::from_secs(secs);
        }
        defaults.retry = self.defaults.retry.as_ref().map(RetryConfig::to_spec);
        defaults
    }

    /// Convert config to a validated deployment plan
    ///
    /// `namespace` overrides the configured namespace; resources without a
    /// namespace are placed in it.
    pub fn to_plan(&self, namespace: Option<&str>) -> Result<DeploymentPlan> {
        let namespace = namespace.or(self.namespace.as_deref());
        let defaults = self.step_defaults();

        let steps = self
            .steps
            .iter()
            .map(|cfg| cfg.to_step(&defaults, namespace))
            .collect();

        DeploymentPlan::new(self.name.clone(), steps)
    }
}

impl StepConfig {
    fn to_step(&self, defaults: &StepDefaults, namespace: Option<&str>) -> Step {
        let action = match &self.action {
            ActionConfig::Apply { resources, recreate } => StepAction::Apply {
                resources: resources
                    .iter()
                    .map(|r| match (r.namespace.is_none() && r.kind() != ResourceKind::Namespace, namespace) {
                        (true, Some(ns)) => r.clone().in_namespace(ns),
                        _ => r.clone(),
                    })
                    .collect(),
                recreate: *recreate,
            },
            ActionConfig::Command {
                program,
                args,
                env,
                safe_to_repeat,
            } => StepAction::Command(CommandSpec {
                program: program.clone(),
                args: args.clone(),
                env: env.clone(),
                safe_to_repeat: *safe_to_repeat,
            }),
            ActionConfig::Wait(condition) => StepAction::Wait(condition.clone()),
        };

        let mut step = Step::new(self.id.clone(), action)
            .named(self.name.clone().unwrap_or_else(|| self.id.clone()))
            .after(self.depends_on.iter().cloned())
            .with_timeout(
                self.timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.timeout),
            );
        step.gate = self.gate.clone();
        step.retry = self
            .retry
            .as_ref()
            .map(RetryConfig::to_spec)
            .or_else(|| defaults.retry.clone());
        if self.exposure {
            step = step.exposing(self.capture.clone().unwrap_or_else(|| "endpoint".to_string()));
        } else if let Some(key) = &self.capture {
            step = step.capturing(key.clone());
        }
        step
    }
}

/// Stack outputs produced by the infrastructure provisioning phase
///
/// Read from the JSON file `cdk deploy --outputs-file` writes:
/// `{ "<StackName>": { "ClusterName": "...", ... } }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InfraOutputs {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub database_endpoint: Option<String>,
    #[serde(default)]
    pub database_secret_arn: Option<String>,
    #[serde(default)]
    pub vpc_id: Option<String>,
}

impl InfraOutputs {
    pub fn from_file<P: AsRef<Path>>(path: P, stack: Option<&str>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read outputs file {}", path.display()))?;
        Self::from_json(&content, stack)
    }

    /// Parse the outputs of `stack`, or of the only stack when `None`
    pub fn from_json(json: &str, stack: Option<&str>) -> Result<Self> {
        let stacks: HashMap<String, serde_json::Value> = serde_json::from_str(json)?;
        let outputs = match stack {
            Some(name) => stacks
                .get(name)
                .with_context(|| format!("Stack '{}' not found in outputs", name))?,
            None => {
                if stacks.len() != 1 {
                    anyhow::bail!(
                        "Outputs file has {} stacks; specify which one to use",
                        stacks.len()
                    );
                }
                stacks
                    .values()
                    .next()
                    .context("Outputs file has no stacks")?
            }
        };
        Ok(serde_json::from_value(outputs.clone())?)
    }

    /// Rendering variables derived from the outputs
    pub fn variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let pairs = [
            ("cluster_name", &self.cluster_name),
            ("db_endpoint", &self.database_endpoint),
            ("db_secret_arn", &self.database_secret_arn),
            ("vpc_id", &self.vpc_id),
        ];
        for (key, value) in pairs {
            if let Some(v) = value {
                vars.insert(key.to_string(), v.clone());
            }
        }
        vars
    }
}
