//! Run context - explicit state threaded through one orchestration run

use crate::core::state::{RunStatus, StepOutcome, StepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Output key under which the discovered public address is stored
pub const ENDPOINT_OUTPUT: &str = "endpoint";

/// Variables derived from the target identity and secret reference
pub const RESERVED_VARIABLES: [&str; 4] = ["cluster_name", "region", "namespace", "secret_ref"];

/// Which cluster, region and namespace a run targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub cluster: String,
    pub region: String,
    pub namespace: String,
}

impl TargetIdentity {
    pub fn new(cluster: impl Into<String>, region: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            region: region.into(),
            namespace: namespace.into(),
        }
    }
}

/// State of a single orchestration run
///
/// Owned by the orchestrator for the duration of a run; the step log is
/// append-only and only the orchestrator writes to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: Uuid,

    pub plan_name: String,

    pub target: TargetIdentity,

    /// Named overrides and values derived from infrastructure outputs
    pub variables: HashMap<String, String>,

    /// Identifier of the externally stored credential (never the value)
    pub secret_ref: Option<String>,

    /// Values discovered during the run (endpoint hostname, ...)
    pub outputs: HashMap<String, String>,

    pub status: RunStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    log: Vec<StepResult>,
}

impl RunContext {
    pub fn new(plan_name: impl Into<String>, target: TargetIdentity) -> Self {
        let mut variables = HashMap::new();
        variables.insert("cluster_name".to_string(), target.cluster.clone());
        variables.insert("region".to_string(), target.region.clone());
        variables.insert("namespace".to_string(), target.namespace.clone());

        Self {
            run_id: Uuid::new_v4(),
            plan_name: plan_name.into(),
            target,
            variables,
            secret_ref: None,
            outputs: HashMap::new(),
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            log: Vec::new(),
        }
    }

    pub fn with_secret_ref(mut self, secret_ref: impl Into<String>) -> Self {
        let secret_ref = secret_ref.into();
        self.variables.insert("secret_ref".to_string(), secret_ref.clone());
        self.secret_ref = Some(secret_ref);
        self
    }

    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    pub fn get_variable(&self, key: &str) -> Option<&String> {
        self.variables.get(key)
    }

    pub fn get_output(&self, key: &str) -> Option<&String> {
        self.outputs.get(key)
    }

    /// The discovered public address, if any
    pub fn endpoint(&self) -> Option<&str> {
        self.outputs.get(ENDPOINT_OUTPUT).map(String::as_str)
    }

    /// Variables available to step actions: overrides plus outputs as `outputs.<key>`
    pub fn rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        for (key, value) in &self.outputs {
            vars.insert(format!("outputs.{}", key), value.clone());
        }
        vars
    }

    /// Begin a new run on this context; a previous run's log is discarded
    pub fn start(&mut self) {
        self.log.clear();
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// Append a result and merge its outputs
    pub fn record(&mut self, result: StepResult) {
        for (key, value) in &result.outputs {
            self.outputs.insert(key.clone(), value.clone());
        }
        self.log.push(result);
    }

    pub fn log(&self) -> &[StepResult] {
        &self.log
    }

    /// Last recorded result for a step
    pub fn last_result(&self, step_id: &str) -> Option<&StepResult> {
        self.log.iter().rev().find(|r| r.step_id == step_id)
    }

    pub fn has_succeeded(&self, step_id: &str) -> bool {
        self.last_result(step_id)
            .is_some_and(|r| r.outcome == StepOutcome::Succeeded)
    }

    pub fn count(&self, outcome: StepOutcome) -> usize {
        self.log.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn warnings(&self) -> Vec<&str> {
        self.log.iter().filter_map(|r| r.warning.as_deref()).collect()
    }
}
