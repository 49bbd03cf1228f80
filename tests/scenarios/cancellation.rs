//! Test: cancelling a run aborts in-flight waits and skips the rest

use crate::helpers::*;
use rollout::core::{RunStatus, StepOutcome};
use rollout::plan::{three_tier_plan, ThreeTierOptions};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_cancel_during_endpoint_wait() {
    let options = ThreeTierOptions {
        endpoint_deadline: Duration::from_secs(30),
        ..quick_options()
    };
    let plan = three_tier_plan(&options).unwrap();
    let cluster = Arc::new(cluster_without_address());

    let started = Instant::now();
    let outcome = run_and_cancel(&plan, cluster, Duration::from_millis(300)).await;

    assert_run_status(&outcome, RunStatus::Aborted);
    assert_ne!(outcome.status.exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(10), "cancel did not interrupt the wait");

    assert_step(&outcome, "ingress", StepOutcome::Succeeded);
    assert_step(&outcome, "endpoint", StepOutcome::Aborted);
    assert!(outcome.ctx.endpoint().is_none());
}

#[tokio::test]
async fn test_cancel_skips_remaining_steps() {
    let mut plan = quick_plan();
    if let Some(step) = plan.steps.get_mut("data-tier") {
        if let rollout::core::StepAction::Wait(condition) = &mut step.action {
            condition.deadline = Duration::from_secs(30);
        }
    }
    let cluster = Arc::new(healthy_cluster().never_ready(&data_tier_check()));

    let outcome = run_and_cancel(&plan, cluster.clone(), Duration::from_millis(200)).await;

    assert_run_status(&outcome, RunStatus::Aborted);
    assert_step(&outcome, "data-tier", StepOutcome::Aborted);
    for step in ["schema-init", "backend", "frontend", "ingress", "endpoint"] {
        assert_step(&outcome, step, StepOutcome::Skipped);
        assert_eq!(outcome.attempts(step), 0);
    }
    assert_eq!(cluster.apply_attempts("schema-init").await, 0);

    // Every step is accounted for
    assert_eq!(outcome.ctx.log().len(), plan.len());
}
