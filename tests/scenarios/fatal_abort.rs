//! Test: a configuration error in the workload rollout aborts the run

use crate::helpers::*;
use rollout::core::{DeployError, RunStatus, StepOutcome};
use std::sync::Arc;

fn broken_rollout_cluster() -> Arc<rollout::platform::InMemoryCluster> {
    Arc::new(healthy_cluster().fail_apply(
        "backend",
        [DeployError::Configuration(
            "Deployment.apps \"backend\" is invalid: spec.template.spec.containers[0].image: Required value".into(),
        )],
    ))
}

#[tokio::test]
async fn test_rollout_configuration_error_aborts() {
    let cluster = broken_rollout_cluster();
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::Aborted);
    assert_ne!(outcome.status.exit_code(), 0);

    // Exactly one failed step, tried once despite its retry policy
    assert_eq!(outcome.steps_with(StepOutcome::Failed), vec!["backend"]);
    assert_eq!(outcome.attempts("backend"), 1);
    assert_eq!(outcome.retries("backend"), 0);
    let diagnostic = outcome.result("backend").diagnostic.clone().unwrap_or_default();
    assert!(diagnostic.contains("configuration error"), "{}", diagnostic);

    // Everything downstream is recorded with zero attempts
    for step in ["frontend", "ingress", "endpoint"] {
        assert_step(&outcome, step, StepOutcome::Skipped);
        assert_eq!(outcome.attempts(step), 0);
        assert!(outcome.started_at(step).is_none(), "{} should never start", step);
    }

    // The exposure step never touched the cluster
    assert_eq!(cluster.evaluations(&endpoint_check()).await, 0);
    assert_eq!(cluster.apply_attempts("frontend").await, 0);
    assert_eq!(outcome.ctx.endpoint(), None);
}

#[tokio::test]
async fn test_steps_before_the_failure_are_kept() {
    let cluster = broken_rollout_cluster();
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster).await;

    for step in ["kubeconfig", "namespace", "database-config", "data-tier", "schema-init"] {
        assert_step(&outcome, step, StepOutcome::Succeeded);
    }
    // Every step appears in the log exactly once
    assert_eq!(outcome.ctx.log().len(), plan.len());
}

#[tokio::test]
async fn test_missing_variable_fails_before_touching_the_cluster() {
    let cluster = Arc::new(healthy_cluster());
    let plan = quick_plan();
    let mut ctx = context(&plan);
    ctx.variables.remove("db_endpoint");

    let outcome = run_with_context(&plan, cluster.clone(), ctx, rollout::execution::SchedulingStrategy::Sequential).await;

    assert_run_status(&outcome, RunStatus::Aborted);
    // The config map needs the endpoint; the step fails without applying anything
    assert_step(&outcome, "database-config", StepOutcome::Failed);
    assert_eq!(cluster.apply_attempts("db-credentials").await, 0);
    assert_eq!(cluster.apply_attempts("app-config").await, 0);
    let diagnostic = outcome.result("database-config").diagnostic.clone().unwrap_or_default();
    assert!(diagnostic.contains("db_endpoint"), "{}", diagnostic);
}
