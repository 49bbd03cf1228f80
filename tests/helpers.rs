//! Test utility functions for rollout

#![allow(dead_code)]

use rollout::core::{ConditionCheck, DeploymentPlan, RunContext, RunStatus, StepOutcome, StepResult, TargetIdentity};
use rollout::execution::{CancelHandle, ExecutionEvent, Orchestrator, SchedulingStrategy};
use rollout::plan::{three_tier_plan, ThreeTierOptions};
use rollout::platform::{InMemoryCluster, Platform};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CLUSTER: &str = "prod-eks";
pub const REGION: &str = "eu-west-1";
pub const NAMESPACE: &str = "three-tier";
pub const DB_ENDPOINT: &str = "threetier-db.cluster-abc.eu-west-1.rds.amazonaws.com";
pub const SECRET_REF: &str = "arn:aws:secretsmanager:eu-west-1:123456789012:secret:db-credentials";
pub const LB_HOSTNAME: &str = "k8s-threetier-abc123.eu-west-1.elb.amazonaws.com";

/// Built-in plan options with millisecond polling and backoff
pub fn quick_options() -> ThreeTierOptions {
    ThreeTierOptions {
        namespace: NAMESPACE.to_string(),
        poll_interval: Some(Duration::from_millis(5)),
        retry_base_delay: Duration::from_millis(2),
        endpoint_deadline: Duration::from_millis(200),
        ..Default::default()
    }
}

pub fn quick_plan() -> DeploymentPlan {
    three_tier_plan(&quick_options()).expect("built-in plan is valid")
}

/// Context carrying everything the infrastructure phase would hand over
pub fn context(plan: &DeploymentPlan) -> RunContext {
    let mut ctx = RunContext::new(plan.name.clone(), TargetIdentity::new(CLUSTER, REGION, NAMESPACE))
        .with_secret_ref(SECRET_REF);
    ctx.set_variable("db_endpoint", DB_ENDPOINT);
    ctx.set_variable("vpc_id", "vpc-0abc");
    ctx
}

/// A healthy cluster: the secret exists and the load balancer hands out an address
pub fn healthy_cluster() -> InMemoryCluster {
    InMemoryCluster::new()
        .with_secret(SECRET_REF, [("username", "dbadmin"), ("password", "s3cret")])
        .with_ingress_hostname(LB_HOSTNAME)
}

/// Same, but the ingress never gets an address
pub fn cluster_without_address() -> InMemoryCluster {
    InMemoryCluster::new().with_secret(SECRET_REF, [("username", "dbadmin"), ("password", "s3cret")])
}

pub fn data_tier_check() -> ConditionCheck {
    ConditionCheck::TcpAccepts {
        host: DB_ENDPOINT.to_string(),
        port: 5432,
    }
}

pub fn endpoint_check() -> ConditionCheck {
    ConditionCheck::IngressAddress {
        namespace: NAMESPACE.to_string(),
        name: "three-tier".to_string(),
    }
}

/// Result of running a plan
pub struct RunOutcome {
    pub status: RunStatus,
    pub ctx: RunContext,
    pub events: Vec<ExecutionEvent>,
}

impl RunOutcome {
    pub fn result(&self, step_id: &str) -> &StepResult {
        self.ctx
            .last_result(step_id)
            .unwrap_or_else(|| panic!("no result for step {}\n{}", step_id, self.summary()))
    }

    pub fn outcome(&self, step_id: &str) -> StepOutcome {
        self.result(step_id).outcome
    }

    pub fn attempts(&self, step_id: &str) -> u32 {
        self.result(step_id).attempts
    }

    pub fn steps_with(&self, outcome: StepOutcome) -> Vec<String> {
        self.ctx
            .log()
            .iter()
            .filter(|r| r.outcome == outcome)
            .map(|r| r.step_id.clone())
            .collect()
    }

    /// Step IDs in the order they were started
    pub fn start_order(&self) -> Vec<String> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ExecutionEvent::StepStarted { step_id, .. } => Some(step_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Index of an event in the stream
    pub fn position(&self, matches: impl Fn(&ExecutionEvent) -> bool) -> Option<usize> {
        self.events.iter().position(matches)
    }

    pub fn started_at(&self, step_id: &str) -> Option<usize> {
        self.position(|e| matches!(e, ExecutionEvent::StepStarted { step_id: id, .. } if id == step_id))
    }

    pub fn finished_at(&self, step_id: &str) -> Option<usize> {
        self.position(|e| matches!(e, ExecutionEvent::StepFinished { result } if result.step_id == step_id))
    }

    pub fn retries(&self, step_id: &str) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::StepRetrying { step_id: id, .. } if id == step_id))
            .count()
    }

    pub fn summary(&self) -> String {
        let mut s = format!("Status: {:?}\n", self.status);
        for r in self.ctx.log() {
            s.push_str(&format!(
                "  {} {:?} x{} {}\n",
                r.step_id,
                r.outcome,
                r.attempts,
                r.warning.as_deref().or(r.diagnostic.as_deref()).unwrap_or("")
            ));
        }
        s
    }
}

pub fn orchestrator(cluster: Arc<InMemoryCluster>, strategy: SchedulingStrategy) -> (Orchestrator, Arc<Mutex<Vec<ExecutionEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut orchestrator = Orchestrator::new(Platform::in_memory(cluster), strategy);
    let sink = events.clone();
    orchestrator.add_event_handler(move |event| {
        sink.lock().unwrap().push(event);
    });
    (orchestrator, events)
}

pub async fn run_with_context(
    plan: &DeploymentPlan,
    cluster: Arc<InMemoryCluster>,
    mut ctx: RunContext,
    strategy: SchedulingStrategy,
) -> RunOutcome {
    let (orchestrator, events) = orchestrator(cluster, strategy);
    let status = orchestrator.run(plan, &mut ctx).await;
    let events = events.lock().unwrap().clone();
    RunOutcome { status, ctx, events }
}

pub async fn run_plan(plan: &DeploymentPlan, cluster: Arc<InMemoryCluster>) -> RunOutcome {
    run_with_context(plan, cluster, context(plan), SchedulingStrategy::Sequential).await
}

/// Run, cancelling after `after`
pub async fn run_and_cancel(plan: &DeploymentPlan, cluster: Arc<InMemoryCluster>, after: Duration) -> RunOutcome {
    let (orchestrator, events) = orchestrator(cluster, SchedulingStrategy::Sequential);
    let cancel: CancelHandle = orchestrator.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        cancel.cancel();
    });

    let mut ctx = context(plan);
    let status = orchestrator.run(plan, &mut ctx).await;
    let events = events.lock().unwrap().clone();
    RunOutcome { status, ctx, events }
}

pub fn assert_run_status(outcome: &RunOutcome, expected: RunStatus) {
    assert_eq!(
        outcome.status, expected,
        "Expected run {:?}, got {:?}\n{}",
        expected, outcome.status, outcome.summary()
    );
    assert_eq!(outcome.ctx.status, expected);
}

pub fn assert_step(outcome: &RunOutcome, step_id: &str, expected: StepOutcome) {
    assert_eq!(
        outcome.outcome(step_id),
        expected,
        "Step {} should be {:?}\n{}",
        step_id,
        expected,
        outcome.summary()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_has_infrastructure_values() {
        let plan = quick_plan();
        let ctx = context(&plan);
        let vars = ctx.rendering_variables();
        for key in ["cluster_name", "region", "vpc_id", "db_endpoint", "secret_ref"] {
            assert!(vars.contains_key(key), "missing {}", key);
        }
    }
}
