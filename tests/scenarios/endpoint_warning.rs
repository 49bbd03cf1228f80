//! Test: the public address never shows up

use crate::helpers::*;
use rollout::core::{RunStatus, StepOutcome};
use rollout::plan::three_tier_plan;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_missing_address_completes_with_warning() {
    let cluster = Arc::new(cluster_without_address());
    let plan = quick_plan();

    let outcome = run_plan(&plan, cluster.clone()).await;

    assert_run_status(&outcome, RunStatus::CompletedWithWarning);
    assert_eq!(outcome.status.exit_code(), 0);

    // Infrastructure is fully applied
    for step in ["namespace", "database-config", "schema-init", "backend", "frontend", "ingress"] {
        assert_step(&outcome, step, StepOutcome::Succeeded);
    }

    // The log notes the missing address
    let endpoint = outcome.result("endpoint");
    assert_eq!(endpoint.outcome, StepOutcome::Succeeded);
    let warning = endpoint.warning.clone().unwrap_or_default();
    assert!(warning.contains("public address not confirmed"), "{}", warning);
    assert!(warning.contains("no load balancer address assigned"), "{}", warning);
    assert_eq!(outcome.ctx.endpoint(), None);
    assert_eq!(outcome.ctx.warnings().len(), 1);

    // Polled more than once before giving up
    assert!(cluster.evaluations(&endpoint_check()).await > 1);
}

#[tokio::test]
async fn test_gate_gives_up_within_its_deadline() {
    let deadline = Duration::from_millis(150);
    let poll = Duration::from_millis(20);
    let options = rollout::plan::ThreeTierOptions {
        endpoint_deadline: deadline,
        poll_interval: Some(poll),
        ..quick_options()
    };
    let plan = three_tier_plan(&options).unwrap();
    let cluster = Arc::new(cluster_without_address());

    let started = Instant::now();
    let outcome = run_plan(&plan, cluster).await;
    let total = started.elapsed();

    assert_run_status(&outcome, RunStatus::CompletedWithWarning);
    let waited = outcome.result("endpoint").duration;
    assert!(waited >= deadline, "gave up early: {:?}", waited);
    // deadline + one poll interval, plus scheduling slack
    assert!(waited <= deadline + poll + Duration::from_millis(100), "overran: {:?}", waited);
    assert!(total < Duration::from_secs(5));
}
