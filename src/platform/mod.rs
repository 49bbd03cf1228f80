//! Seams to the outside world: cluster API, readiness probes, commands, secret store
//!
//! The orchestrator only ever talks to these traits. Production uses
//! `kubectl`/`aws` subprocesses; tests and dry runs use [`memory::InMemoryCluster`].

pub mod command;
pub mod kubectl;
pub mod memory;
pub mod secrets;

use crate::core::{
    condition::{ConditionCheck, Observation},
    error::DeployError,
    resource::ResourceDefinition,
    step::CommandSpec,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub use command::SubprocessRunner;
pub use kubectl::{KubectlApplier, KubectlProbe};
pub use memory::InMemoryCluster;
pub use secrets::AwsSecretsResolver;

/// Result of a create-or-update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Unchanged,
}

/// Create-or-update of declarative resource definitions
#[async_trait]
pub trait ResourceApplier: Send + Sync {
    /// Applying the same definition twice with no drift must yield `Unchanged`
    async fn apply(&self, resource: &ResourceDefinition) -> Result<ApplyOutcome, DeployError>;

    /// Remove the resource if present; absent is not an error
    async fn delete(&self, resource: &ResourceDefinition) -> Result<(), DeployError>;
}

/// Evaluates a readiness check against observable state once
#[async_trait]
pub trait Probe: Send + Sync {
    async fn evaluate(&self, check: &ConditionCheck) -> Result<Observation, DeployError>;
}

/// Captured output of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion; a non-zero exit is an error
    async fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput, DeployError>;

    /// Run with `input` piped to stdin
    async fn run_with_input(
        &self,
        command: &CommandSpec,
        input: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, DeployError>;
}

/// Fetches a credential from the external secret store
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<BTreeMap<String, String>, DeployError>;
}

/// Everything a run needs from the outside world
#[derive(Clone)]
pub struct Platform {
    pub applier: Arc<dyn ResourceApplier>,
    pub probe: Arc<dyn Probe>,
    pub runner: Arc<dyn CommandRunner>,
    pub secrets: Arc<dyn SecretResolver>,
}

impl Platform {
    /// Live platform backed by `kubectl` and the `aws` CLI
    pub fn kubernetes(region: &str) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SubprocessRunner::new());
        Self {
            applier: Arc::new(KubectlApplier::new(runner.clone())),
            probe: Arc::new(KubectlProbe::new(runner.clone())),
            secrets: Arc::new(AwsSecretsResolver::new(runner.clone(), region)),
            runner,
        }
    }

    /// Platform whose every seam is the same in-memory cluster
    pub fn in_memory(cluster: Arc<InMemoryCluster>) -> Self {
        Self {
            applier: cluster.clone(),
            probe: cluster.clone(),
            runner: cluster.clone(),
            secrets: cluster,
        }
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform").finish_non_exhaustive()
    }
}
