//! Test: a step that keeps failing transiently stops after max attempts

use crate::helpers::*;
use rollout::core::{DeployError, RunStatus, StepOutcome};
use std::sync::Arc;

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let cluster = Arc::new(healthy_cluster().fail_apply(
        "backend",
        (0..5).map(|_| DeployError::TransientInfra("the server is currently unable to handle the request".into())),
    ));
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::Aborted);
    assert_step(&outcome, "backend", StepOutcome::Failed);
    assert_eq!(outcome.attempts("backend"), 3);
    assert_eq!(cluster.apply_attempts("backend").await, 3);
    // No retry announced after the last attempt
    assert_eq!(outcome.retries("backend"), 2);

    let diagnostic = outcome.result("backend").diagnostic.clone().unwrap_or_default();
    assert!(diagnostic.contains("gave up after 3 attempts"), "{}", diagnostic);
    assert!(diagnostic.contains("unable to handle the request"), "{}", diagnostic);

    assert_step(&outcome, "frontend", StepOutcome::Skipped);
}

#[tokio::test]
async fn test_step_without_retry_policy_runs_once() {
    // The data tier wait has no retry policy; a dead database fails it once
    let mut plan = quick_plan();
    if let Some(step) = plan.steps.get_mut("data-tier") {
        if let rollout::core::StepAction::Wait(condition) = &mut step.action {
            condition.deadline = std::time::Duration::from_millis(30);
        }
    }
    let cluster = Arc::new(healthy_cluster().never_ready(&data_tier_check()));

    let outcome = run_plan(&plan, cluster).await;

    assert_run_status(&outcome, RunStatus::Aborted);
    assert_step(&outcome, "data-tier", StepOutcome::Failed);
    assert_eq!(outcome.attempts("data-tier"), 1);
    let diagnostic = outcome.result("data-tier").diagnostic.clone().unwrap_or_default();
    assert!(diagnostic.contains("not satisfied"), "{}", diagnostic);
    assert_eq!(outcome.attempts("schema-init"), 0);
}
