//! Step executor - runs one step's action, gate and retries

use crate::{
    core::{
        condition::{Condition, Observation},
        error::DeployError,
        resource::{ResourceDefinition, ResourceKind},
        state::StepResult,
        step::{resolve_templates, CommandSpec, Step, StepAction},
    },
    execution::{
        cancel::CancelSignal,
        gate::{GateOutcome, ReadinessGate},
        retry::{RetryError, RetryPolicy, RetrySpec},
    },
    platform::{ApplyOutcome, Platform},
};
use chrono::Utc;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Called before each retry wait: (attempt, error, delay)
pub type RetryObserver<'a> = &'a (dyn Fn(u32, &DeployError, Duration) + Send + Sync);

/// Action with every template rendered, ready to attempt
enum PreparedAction {
    Apply {
        resources: Vec<ResourceDefinition>,
        recreate: bool,
    },
    Command(CommandSpec),
    Wait(Condition),
}

/// Executes a single step
pub struct StepExecutor {
    platform: Platform,
    retry: RetryPolicy,
    gate: ReadinessGate,
}

impl StepExecutor {
    pub fn new(platform: Platform, cancel: CancelSignal) -> Self {
        Self {
            platform,
            retry: RetryPolicy::new(cancel.clone()),
            gate: ReadinessGate::new(cancel),
        }
    }

    /// Execute a step and return its result
    ///
    /// Never panics on step failure; failures, soft failures and
    /// cancellation are all reported through the returned [`StepResult`].
    pub async fn execute(
        &self,
        step: &Step,
        variables: &HashMap<String, String>,
        on_retry: RetryObserver<'_>,
    ) -> StepResult {
        info!("Executing step: {}", step.id);
        let started_at = Utc::now();
        let clock = Instant::now();

        let (action, gate) = match prepare(step, variables) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!("Step {} is misconfigured: {}", step.id, e);
                return StepResult::failed(&step.id, 1, started_at, clock.elapsed(), e.to_string());
            }
        };

        let spec = effective_retry(step);
        let outcome = self
            .retry
            .run_observed(
                &spec,
                |attempt| self.attempt(step, &action, gate.as_ref(), attempt),
                |attempt, err, delay| on_retry(attempt, err, delay),
            )
            .await;

        let elapsed = clock.elapsed();
        match outcome {
            Ok((observation, attempts)) => {
                info!("Step {} completed after {} attempt(s)", step.id, attempts);
                self.success(step, observation, attempts, started_at, elapsed)
            }
            Err(RetryError::Cancelled { attempts }) => {
                warn!("Step {} cancelled", step.id);
                StepResult::aborted(&step.id, attempts, started_at, elapsed)
            }
            Err(err) => {
                let attempts = err.attempts();
                match err.last_error() {
                    Some(DeployError::ReadinessTimeout {
                        condition,
                        last_observed,
                    }) if step.exposure => {
                        let warning = format!(
                            "public address not confirmed: {} did not hold within its deadline (last observed: {}); infrastructure is applied and may still be converging",
                            condition, last_observed
                        );
                        warn!("Step {}: {}", step.id, warning);
                        StepResult::succeeded(&step.id, attempts, started_at, elapsed).with_warning(warning)
                    }
                    _ => {
                        error!("Step {} failed: {}", step.id, err);
                        StepResult::failed(&step.id, attempts, started_at, elapsed, err.to_string())
                    }
                }
            }
        }
    }

    fn success(
        &self,
        step: &Step,
        observation: Option<Observation>,
        attempts: u32,
        started_at: chrono::DateTime<Utc>,
        elapsed: Duration,
    ) -> StepResult {
        let mut result = StepResult::succeeded(&step.id, attempts, started_at, elapsed);
        let Some(observation) = observation else {
            return result;
        };
        result = result.with_diagnostic(observation.detail.clone());

        match (&step.capture, observation.value) {
            (Some(key), Some(value)) => {
                info!("Step {} discovered {} = {}", step.id, key, value);
                result.with_output(key.clone(), value)
            }
            (Some(key), None) if step.exposure => {
                result.with_warning(format!("condition held but reported no value for {}", key))
            }
            _ => result,
        }
    }

    /// One attempt: the action, then the gate
    async fn attempt(
        &self,
        step: &Step,
        action: &PreparedAction,
        gate: Option<&Condition>,
        attempt: u32,
    ) -> Result<Option<Observation>, DeployError> {
        debug!("Step {} attempt {}", step.id, attempt);

        let observed = match action {
            PreparedAction::Wait(condition) => Some(self.wait(condition).await?),
            PreparedAction::Apply { resources, recreate } => {
                self.bounded(step, self.apply_all(resources, *recreate)).await?;
                None
            }
            PreparedAction::Command(command) => {
                let output = self.platform.runner.run(command, step.timeout).await?;
                let stdout = output.stdout.trim();
                (!stdout.is_empty()).then(|| Observation::ready(format!("{} exited 0", command.program)).with_value(stdout))
            }
        };

        match gate {
            Some(condition) => Ok(Some(self.wait(condition).await?)),
            None => Ok(observed),
        }
    }

    async fn bounded<F, T>(&self, step: &Step, fut: F) -> Result<T, DeployError>
    where
        F: std::future::Future<Output = Result<T, DeployError>>,
    {
        timeout(step.timeout, fut).await.map_err(|_| {
            DeployError::execution(
                format!("step {} timed out after {}s", step.id, step.timeout.as_secs()),
                None,
            )
        })?
    }

    async fn apply_all(&self, resources: &[ResourceDefinition], recreate: bool) -> Result<(), DeployError> {
        for resource in resources {
            let resource = match resource.secret_reference() {
                Some(reference) => {
                    debug!("Resolving secret {} for {}", reference, resource);
                    let values = self.platform.secrets.resolve(reference).await?;
                    resource.with_resolved_secret(values)
                }
                None => resource.clone(),
            };

            if recreate && resource.kind() == ResourceKind::Job {
                self.platform.applier.delete(&resource).await?;
            }

            match self.platform.applier.apply(&resource).await? {
                ApplyOutcome::Applied => info!("Applied {}", resource),
                ApplyOutcome::Unchanged => debug!("{} unchanged", resource),
            }
        }
        Ok(())
    }

    async fn wait(&self, condition: &Condition) -> Result<Observation, DeployError> {
        match self.gate.wait_until(condition, self.platform.probe.as_ref()).await {
            GateOutcome::Ready { observation, .. } => Ok(observation),
            outcome @ GateOutcome::TimedOut { .. } => Err(DeployError::ReadinessTimeout {
                condition: condition.to_string(),
                last_observed: outcome.last_observed(),
            }),
            GateOutcome::Cancelled { .. } => Err(DeployError::Cancelled),
        }
    }
}

/// Render the step's templates once, before any attempt
fn prepare(
    step: &Step,
    variables: &HashMap<String, String>,
) -> Result<(PreparedAction, Option<Condition>), DeployError> {
    let action = match &step.action {
        StepAction::Apply { resources, recreate } => PreparedAction::Apply {
            resources: resources
                .iter()
                .map(|r| resolve_templates(r, variables))
                .collect::<Result<_, _>>()?,
            recreate: *recreate,
        },
        StepAction::Command(command) => PreparedAction::Command(command.resolve(variables)?),
        StepAction::Wait(condition) => PreparedAction::Wait(resolve_templates(condition, variables)?),
    };
    let gate = step
        .gate
        .as_ref()
        .map(|c| resolve_templates(c, variables))
        .transpose()?;
    Ok((action, gate))
}

/// The step's retry spec, limited to one attempt for actions unsafe to repeat
fn effective_retry(step: &Step) -> RetrySpec {
    match &step.retry {
        Some(spec) if spec.max_attempts > 1 && !step.action.is_repeatable() => {
            warn!(
                "Step {} is not safe to repeat; ignoring retry policy of {} attempts",
                step.id, spec.max_attempts
            );
            RetrySpec::once()
        }
        Some(spec) => spec.clone(),
        None => RetrySpec::once(),
    }
}
