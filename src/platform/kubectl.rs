//! `kubectl`-backed resource applier and readiness probe

use super::{ApplyOutcome, CommandRunner, Probe, ResourceApplier};
use crate::core::{
    condition::{ConditionCheck, Observation},
    error::DeployError,
    resource::{ResourceDefinition, ResourceKind},
    step::CommandSpec,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

const KUBECTL_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

fn kubectl<I, S>(args: I) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new("kubectl", args)
}

/// Kubernetes resource type name as understood by `kubectl`
fn api_resource(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Namespace => "namespace",
        ResourceKind::Secret => "secret",
        ResourceKind::ConfigMap => "configmap",
        ResourceKind::Deployment => "deployment",
        ResourceKind::Service => "service",
        ResourceKind::Job => "job",
        ResourceKind::Ingress => "ingress",
    }
}

/// Interpret `kubectl apply` output (`deployment.apps/backend unchanged`)
pub fn parse_apply_output(stdout: &str) -> ApplyOutcome {
    let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    if !lines.is_empty() && lines.iter().all(|l| l.trim_end().ends_with(" unchanged")) {
        ApplyOutcome::Unchanged
    } else {
        ApplyOutcome::Applied
    }
}

/// Applies resources with `kubectl apply -f -`
pub struct KubectlApplier {
    runner: Arc<dyn CommandRunner>,
}

impl KubectlApplier {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ResourceApplier for KubectlApplier {
    async fn apply(&self, resource: &ResourceDefinition) -> Result<ApplyOutcome, DeployError> {
        if let Some(reference) = resource.secret_reference() {
            return Err(DeployError::Configuration(format!(
                "{} still points at unresolved secret {}",
                resource, reference
            )));
        }

        let manifest = serde_json::to_string(&resource.to_manifest())
            .map_err(|e| DeployError::Configuration(format!("cannot render {}: {}", resource, e)))?;

        let output = self
            .runner
            .run_with_input(&kubectl(["apply", "-f", "-"]), &manifest, KUBECTL_TIMEOUT)
            .await?;

        let outcome = parse_apply_output(&output.stdout);
        debug!("kubectl apply {}: {:?}", resource, outcome);
        Ok(outcome)
    }

    async fn delete(&self, resource: &ResourceDefinition) -> Result<(), DeployError> {
        let mut args = vec![
            "delete".to_string(),
            api_resource(resource.kind()).to_string(),
            resource.name.clone(),
            "--ignore-not-found".to_string(),
            "--wait=true".to_string(),
        ];
        if let (true, Some(ns)) = (resource.is_namespaced(), &resource.namespace) {
            args.push("-n".to_string());
            args.push(ns.clone());
        }
        self.runner.run(&kubectl(args), KUBECTL_TIMEOUT).await?;
        Ok(())
    }
}

/// Evaluates readiness checks with `kubectl get -o json` and direct network probes
pub struct KubectlProbe {
    runner: Arc<dyn CommandRunner>,
}

impl KubectlProbe {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `kubectl get ... -o json`; `None` when the object does not exist yet
    async fn get_json(&self, args: Vec<String>) -> Result<Option<Value>, DeployError> {
        let mut full = vec!["get".to_string()];
        full.extend(args);
        full.push("-o".to_string());
        full.push("json".to_string());

        match self.runner.run(&kubectl(full), PROBE_TIMEOUT).await {
            Ok(output) => serde_json::from_str(&output.stdout)
                .map(Some)
                .map_err(|e| DeployError::TransientInfra(format!("unparseable kubectl output: {}", e))),
            Err(DeployError::Execution { cause, .. }) if cause.contains("NotFound") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_object(&self, kind: &str, namespace: &str, name: &str) -> Result<Option<Value>, DeployError> {
        self.get_json(vec![
            kind.to_string(),
            name.to_string(),
            "-n".to_string(),
            namespace.to_string(),
        ])
        .await
    }
}

fn count(value: &Value, pointer: &str) -> i64 {
    value.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

/// Ready when every pod reports condition Ready=True
pub fn pods_ready(list: &Value) -> Observation {
    let pods = list.get("items").and_then(Value::as_array).cloned().unwrap_or_default();
    if pods.is_empty() {
        return Observation::pending("no pods match");
    }
    let ready = pods
        .iter()
        .filter(|pod| {
            pod.pointer("/status/conditions")
                .and_then(Value::as_array)
                .is_some_and(|conds| {
                    conds.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                })
        })
        .count();
    let detail = format!("{}/{} pods ready", ready, pods.len());
    if ready == pods.len() {
        Observation::ready(detail)
    } else {
        Observation::pending(detail)
    }
}

pub fn deployment_available(deployment: &Value) -> Observation {
    let desired = deployment
        .pointer("/spec/replicas")
        .and_then(Value::as_i64)
        .unwrap_or(1);
    let available = count(deployment, "/status/availableReplicas");
    let detail = format!("{}/{} replicas available", available, desired);
    if available >= desired {
        Observation::ready(detail)
    } else {
        Observation::pending(detail)
    }
}

pub fn job_complete(job: &Value) -> Observation {
    let succeeded = count(job, "/status/succeeded");
    let failed = count(job, "/status/failed");
    if succeeded > 0 {
        Observation::ready(format!("{} succeeded", succeeded))
    } else {
        Observation::pending(format!("0 succeeded, {} failed", failed))
    }
}

pub fn ingress_address(ingress: &Value) -> Observation {
    let entry = ingress.pointer("/status/loadBalancer/ingress/0");
    let address = entry
        .and_then(|e| e.get("hostname").or_else(|| e.get("ip")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty());
    match address {
        Some(addr) => Observation::ready(format!("address {}", addr)).with_value(addr),
        None => Observation::pending("no load balancer address assigned"),
    }
}

#[async_trait]
impl Probe for KubectlProbe {
    async fn evaluate(&self, check: &ConditionCheck) -> Result<Observation, DeployError> {
        let missing = |what: &str| -> Result<Observation, DeployError> {
            Ok(Observation::pending(format!("{} not found", what)))
        };

        match check {
            ConditionCheck::PodsReady { namespace, selector } => {
                let list = self
                    .get_json(vec![
                        "pods".to_string(),
                        "-n".to_string(),
                        namespace.clone(),
                        "-l".to_string(),
                        selector.clone(),
                    ])
                    .await?;
                Ok(list.map(|l| pods_ready(&l)).unwrap_or_else(|| Observation::pending("no pods match")))
            }
            ConditionCheck::DeploymentAvailable { namespace, name } => {
                match self.get_object("deployment", namespace, name).await? {
                    Some(d) => Ok(deployment_available(&d)),
                    None => missing("deployment"),
                }
            }
            ConditionCheck::JobComplete { namespace, name } => match self.get_object("job", namespace, name).await? {
                Some(j) => Ok(job_complete(&j)),
                None => missing("job"),
            },
            ConditionCheck::IngressAddress { namespace, name } => {
                match self.get_object("ingress", namespace, name).await? {
                    Some(i) => Ok(ingress_address(&i)),
                    None => missing("ingress"),
                }
            }
            ConditionCheck::TcpAccepts { host, port } => {
                match tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host.as_str(), *port))).await {
                    Ok(Ok(_)) => Ok(Observation::ready(format!("{}:{} accepting", host, port))),
                    Ok(Err(e)) => Ok(Observation::pending(format!("{}:{}: {}", host, port, e))),
                    Err(_) => Ok(Observation::pending(format!("{}:{}: connect timed out", host, port))),
                }
            }
            ConditionCheck::DnsResolves { host } => match tokio::net::lookup_host((host.as_str(), 443)).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => Ok(Observation::ready(format!("{} -> {}", host, addr.ip())).with_value(host.clone())),
                    None => Ok(Observation::pending(format!("{} has no addresses", host))),
                },
                Err(e) => Ok(Observation::pending(format!("{}: {}", host, e))),
            },
            ConditionCheck::CommandSucceeds { program, args } => {
                let spec = CommandSpec::new(program.clone(), args.clone());
                match self.runner.run(&spec, PROBE_TIMEOUT).await {
                    Ok(out) => Ok(Observation::ready(format!("{} succeeded", program)).with_value(out.stdout.trim())),
                    Err(e) => Ok(Observation::pending(e.to_string())),
                }
            }
        }
    }
}
