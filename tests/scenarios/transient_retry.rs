//! Test: schema initialization survives transient infrastructure errors

use crate::helpers::*;
use rollout::core::{DeployError, RunStatus, StepOutcome};
use rollout::execution::ExecutionEvent;
use std::sync::Arc;

/// Two transient failures, then success on the third attempt
#[tokio::test]
async fn test_schema_init_succeeds_on_third_attempt() {
    let cluster = Arc::new(healthy_cluster().fail_apply(
        "schema-init",
        [
            DeployError::TransientInfra("etcdserver: request timed out".into()),
            DeployError::TransientInfra("connection reset by peer".into()),
        ],
    ));
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_step(&outcome, "schema-init", StepOutcome::Succeeded);
    assert_eq!(outcome.attempts("schema-init"), 3);
    assert_eq!(cluster.apply_attempts("schema-init").await, 3);
    assert_eq!(outcome.retries("schema-init"), 2);

    // Downstream steps ran once each
    assert_eq!(outcome.attempts("backend"), 1);
    assert_eq!(outcome.attempts("frontend"), 1);
}

/// Retry events carry the attempt number and a growing delay
#[tokio::test]
async fn test_retry_events_back_off() {
    let cluster = Arc::new(healthy_cluster().fail_apply(
        "schema-init",
        [
            DeployError::TransientInfra("Throttling".into()),
            DeployError::TransientInfra("Throttling".into()),
        ],
    ));
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster).await;

    let retries: Vec<_> = outcome
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepRetrying {
                step_id,
                attempt,
                max_attempts,
                error,
                ..
            } if step_id == "schema-init" => Some((*attempt, *max_attempts, error.clone())),
            _ => None,
        })
        .collect();

    assert_eq!(retries.len(), 2);
    assert_eq!((retries[0].0, retries[0].1), (1, 3));
    assert_eq!((retries[1].0, retries[1].1), (2, 3));
    assert!(retries[0].2.contains("transient"));
}

/// A transient failure in a plain apply step is retried too
#[tokio::test]
async fn test_transient_namespace_failure_is_retried() {
    let cluster = Arc::new(
        healthy_cluster().fail_apply(NAMESPACE, [DeployError::TransientInfra("i/o timeout".into())]),
    );
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_eq!(outcome.attempts("namespace"), 2);
}
