//! In-memory cluster for dry runs and tests

use super::{ApplyOutcome, CommandOutput, CommandRunner, Probe, ResourceApplier, SecretResolver};
use crate::core::{
    condition::{ConditionCheck, Observation},
    error::DeployError,
    resource::{ResourceDefinition, ResourceKind},
    step::CommandSpec,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct ClusterState {
    /// Manifests by `kind/namespace/name`
    objects: BTreeMap<String, Value>,

    /// Every apply call, in order: (key, outcome)
    apply_log: Vec<(String, ApplyOutcome)>,

    /// Scripted apply failures by resource name, consumed one per call
    apply_failures: HashMap<String, VecDeque<DeployError>>,

    /// Evaluations remaining before a check reports ready, by check text
    ready_after: HashMap<String, u32>,

    /// Checks that never become ready
    never_ready: Vec<String>,

    /// Evaluation count by check text
    evaluations: HashMap<String, u32>,

    ingress_hostname: Option<String>,

    /// Scripted command results by command prefix, consumed one per call
    command_results: Vec<(String, VecDeque<Result<CommandOutput, DeployError>>)>,

    command_log: Vec<String>,

    secrets: HashMap<String, BTreeMap<String, String>>,
}

/// A fake cluster that keeps applied manifests in memory
///
/// Readiness of unscripted checks follows the stored objects: a workload is
/// available once applied, an ingress gets an address only if one was
/// configured with [`with_ingress_hostname`](Self::with_ingress_hostname).
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hostname the load balancer controller eventually assigns to ingresses
    pub fn with_ingress_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.state.get_mut().ingress_hostname = Some(hostname.into());
        self
    }

    /// Report not-ready for the first `polls - 1` evaluations of `check`
    pub fn ready_after(mut self, check: &ConditionCheck, polls: u32) -> Self {
        self.state
            .get_mut()
            .ready_after
            .insert(check.to_string(), polls.saturating_sub(1));
        self
    }

    pub fn never_ready(mut self, check: &ConditionCheck) -> Self {
        self.state.get_mut().never_ready.push(check.to_string());
        self
    }

    /// Fail the next applies of resource `name` with these errors, in order
    pub fn fail_apply<I: IntoIterator<Item = DeployError>>(mut self, name: impl Into<String>, errors: I) -> Self {
        self.state
            .get_mut()
            .apply_failures
            .entry(name.into())
            .or_default()
            .extend(errors);
        self
    }

    /// Script results for commands whose display starts with `prefix`
    pub fn script_command<I>(mut self, prefix: impl Into<String>, results: I) -> Self
    where
        I: IntoIterator<Item = Result<CommandOutput, DeployError>>,
    {
        self.state
            .get_mut()
            .command_results
            .push((prefix.into(), results.into_iter().collect()));
        self
    }

    pub fn with_secret<I, K, V>(mut self, reference: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.state.get_mut().secrets.insert(
            reference.into(),
            values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }

    /// Stored manifest for `kind/namespace/name`
    pub async fn object(&self, key: &str) -> Option<Value> {
        self.state.lock().await.objects.get(key).cloned()
    }

    pub async fn object_keys(&self) -> Vec<String> {
        self.state.lock().await.objects.keys().cloned().collect()
    }

    pub async fn apply_log(&self) -> Vec<(String, ApplyOutcome)> {
        self.state.lock().await.apply_log.clone()
    }

    /// How many times resources named `name` were applied (including failures)
    pub async fn apply_attempts(&self, name: &str) -> usize {
        let state = self.state.lock().await;
        state
            .apply_log
            .iter()
            .filter(|(key, _)| key.rsplit('/').next() == Some(name))
            .count()
    }

    pub async fn evaluations(&self, check: &ConditionCheck) -> u32 {
        self.state
            .lock()
            .await
            .evaluations
            .get(&check.to_string())
            .copied()
            .unwrap_or(0)
    }

    pub async fn command_log(&self) -> Vec<String> {
        self.state.lock().await.command_log.clone()
    }

    fn observe_objects(state: &ClusterState, check: &ConditionCheck) -> Observation {
        let exists = |kind: ResourceKind, ns: &str, name: &str| {
            state.objects.contains_key(&format!("{}/{}/{}", kind, ns, name))
        };
        match check {
            ConditionCheck::DeploymentAvailable { namespace, name } => {
                if exists(ResourceKind::Deployment, namespace, name) {
                    Observation::ready("all replicas available")
                } else {
                    Observation::pending("deployment not found")
                }
            }
            ConditionCheck::JobComplete { namespace, name } => {
                if exists(ResourceKind::Job, namespace, name) {
                    Observation::ready("1 succeeded")
                } else {
                    Observation::pending("job not found")
                }
            }
            ConditionCheck::IngressAddress { namespace, name } => {
                if !exists(ResourceKind::Ingress, namespace, name) {
                    return Observation::pending("ingress not found");
                }
                match &state.ingress_hostname {
                    Some(host) => Observation::ready(format!("address {}", host)).with_value(host.clone()),
                    None => Observation::pending("no load balancer address assigned"),
                }
            }
            other => Observation::ready(format!("{}", other)),
        }
    }
}

#[async_trait]
impl ResourceApplier for InMemoryCluster {
    async fn apply(&self, resource: &ResourceDefinition) -> Result<ApplyOutcome, DeployError> {
        if let Some(reference) = resource.secret_reference() {
            return Err(DeployError::Configuration(format!(
                "{} still points at unresolved secret {}",
                resource, reference
            )));
        }

        let mut state = self.state.lock().await;
        let key = resource.key();

        if let Some(err) = state
            .apply_failures
            .get_mut(&resource.name)
            .and_then(VecDeque::pop_front)
        {
            // Failed calls are logged as Applied attempts so callers can count them
            state.apply_log.push((key, ApplyOutcome::Applied));
            return Err(err);
        }

        let manifest = resource.to_manifest();
        let outcome = match state.objects.get(&key) {
            Some(existing) if *existing == manifest => ApplyOutcome::Unchanged,
            _ => {
                state.objects.insert(key.clone(), manifest);
                ApplyOutcome::Applied
            }
        };
        debug!("in-memory apply {}: {:?}", key, outcome);
        state.apply_log.push((key, outcome));
        Ok(outcome)
    }

    async fn delete(&self, resource: &ResourceDefinition) -> Result<(), DeployError> {
        self.state.lock().await.objects.remove(&resource.key());
        Ok(())
    }
}

#[async_trait]
impl Probe for InMemoryCluster {
    async fn evaluate(&self, check: &ConditionCheck) -> Result<Observation, DeployError> {
        let mut state = self.state.lock().await;
        let text = check.to_string();
        *state.evaluations.entry(text.clone()).or_insert(0) += 1;

        if state.never_ready.contains(&text) {
            return Ok(Observation::pending(format!("{} not satisfied", text)));
        }
        if let Some(remaining) = state.ready_after.get_mut(&text) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(Observation::pending(format!("{} not satisfied yet", text)));
            }
        }
        Ok(Self::observe_objects(&state, check))
    }
}

impl InMemoryCluster {
    async fn next_command_result(&self, command: &CommandSpec) -> Result<CommandOutput, DeployError> {
        let mut state = self.state.lock().await;
        let display = command.display();
        state.command_log.push(display.clone());

        let scripted = state
            .command_results
            .iter_mut()
            .find(|(prefix, results)| display.starts_with(prefix.as_str()) && !results.is_empty())
            .and_then(|(_, results)| results.pop_front());
        let result = scripted.unwrap_or_else(|| Ok(CommandOutput::default()));
        if result.is_ok() {
            if let Some((namespace, release)) = helm_release(command) {
                // A helm release shows up as a deployment named after it
                let key = format!("{}/{}/{}", ResourceKind::Deployment, namespace, release);
                let manifest = serde_json::json!({
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "metadata": { "name": release, "namespace": namespace },
                });
                state.objects.insert(key, manifest);
            }
        }
        result
    }
}

/// `(namespace, release)` of a `helm upgrade --install` / `helm install` command
fn helm_release(command: &CommandSpec) -> Option<(String, String)> {
    if command.program != "helm" {
        return None;
    }
    let args = &command.args;
    let release = args
        .iter()
        .position(|a| a == "--install" || a == "install")
        .and_then(|i| args.get(i + 1))?;
    let namespace = args
        .iter()
        .position(|a| a == "-n" || a == "--namespace")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    Some((namespace, release.clone()))
}

#[async_trait]
impl CommandRunner for InMemoryCluster {
    async fn run(&self, command: &CommandSpec, _timeout: Duration) -> Result<CommandOutput, DeployError> {
        self.next_command_result(command).await
    }

    async fn run_with_input(
        &self,
        command: &CommandSpec,
        _input: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput, DeployError> {
        self.next_command_result(command).await
    }
}

#[async_trait]
impl SecretResolver for InMemoryCluster {
    async fn resolve(&self, reference: &str) -> Result<BTreeMap<String, String>, DeployError> {
        self.state
            .lock()
            .await
            .secrets
            .get(reference)
            .cloned()
            .ok_or_else(|| DeployError::Configuration(format!("secret {} does not exist", reference)))
    }
}
