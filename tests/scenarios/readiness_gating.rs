//! Test: the data tier becomes reachable only after a few polls

use crate::helpers::*;
use rollout::core::{ResourceDefinition, RunStatus, StepOutcome};
use rollout::platform::{ApplyOutcome, ResourceApplier};
use std::sync::Arc;

/// Schema initialization waits for the data tier, which needs three polls
#[tokio::test]
async fn test_schema_init_waits_for_data_tier() {
    let cluster = Arc::new(healthy_cluster().ready_after(&data_tier_check(), 3));
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_eq!(cluster.evaluations(&data_tier_check()).await, 3);

    // The wait is one attempt that polled three times
    assert_step(&outcome, "data-tier", StepOutcome::Succeeded);
    assert_eq!(outcome.attempts("data-tier"), 1);

    // Schema init starts only after the data tier reported ready
    let data_ready = outcome.finished_at("data-tier").unwrap();
    let schema_started = outcome.started_at("schema-init").unwrap();
    assert!(data_ready < schema_started);
    assert_eq!(outcome.attempts("schema-init"), 1);
}

/// A gate that is already satisfied returns after a single evaluation
#[tokio::test]
async fn test_satisfied_gate_returns_immediately() {
    let cluster = Arc::new(healthy_cluster());
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_eq!(cluster.evaluations(&data_tier_check()).await, 1);
    assert_eq!(cluster.evaluations(&endpoint_check()).await, 1);
}

/// The endpoint discovered by the exposure step lands in the context
#[tokio::test]
async fn test_endpoint_is_recorded() {
    let cluster = Arc::new(healthy_cluster());
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_eq!(outcome.ctx.endpoint(), Some(LB_HOSTNAME));
    assert!(outcome.ctx.warnings().is_empty());

    // The secret was resolved just in time and applied with its values
    let secret = cluster
        .object(&format!("secret/{}/db-credentials", NAMESPACE))
        .await
        .unwrap();
    assert_eq!(secret["stringData"]["username"], "dbadmin");

    let config = cluster
        .object(&format!("configmap/{}/app-config", NAMESPACE))
        .await
        .unwrap();
    assert_eq!(config["data"]["DB_HOST"], DB_ENDPOINT);
}

/// A step never starts while a prerequisite's gate is pending
#[tokio::test]
async fn test_pending_gate_holds_consumers() {
    let cluster = Arc::new(healthy_cluster());
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;
    let backend_done = outcome.finished_at("backend").unwrap();
    let frontend_started = outcome.started_at("frontend").unwrap();
    assert!(backend_done < frontend_started);

    // The cluster holds everything the plan applies
    let keys = cluster.object_keys().await;
    for key in [
        "namespace/three-tier",
        "deployment/three-tier/backend",
        "service/three-tier/frontend",
        "ingress/three-tier/three-tier",
        "job/three-tier/schema-init",
    ] {
        assert!(keys.iter().any(|k| k == key), "missing {} in {:?}", key, keys);
    }

    // Re-applying an applied definition is a no-op
    let ns = ResourceDefinition::namespace(NAMESPACE);
    assert_eq!(cluster.apply(&ns).await.unwrap(), ApplyOutcome::Unchanged);
}
