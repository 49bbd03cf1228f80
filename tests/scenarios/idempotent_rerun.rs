//! Test: re-running a completed deployment changes nothing

use crate::helpers::*;
use rollout::core::RunStatus;
use rollout::execution::SchedulingStrategy;
use rollout::platform::ApplyOutcome;
use std::sync::Arc;

#[tokio::test]
async fn test_rerun_is_a_resource_level_noop() {
    let cluster = Arc::new(healthy_cluster().ready_after(&data_tier_check(), 3));
    let plan = quick_plan();

    let first = run_plan(&plan, cluster.clone()).await;
    assert_run_status(&first, RunStatus::Completed);
    let applied_first = cluster.apply_log().await.len();
    let polls_first = cluster.evaluations(&data_tier_check()).await;

    // Same context, second run
    let second = run_with_context(&plan, cluster.clone(), first.ctx, SchedulingStrategy::Sequential).await;
    assert_run_status(&second, RunStatus::Completed);

    let log = cluster.apply_log().await;
    let rerun: Vec<_> = log[applied_first..].to_vec();
    assert!(!rerun.is_empty());
    for (key, result) in &rerun {
        assert_eq!(*result, ApplyOutcome::Unchanged, "{} changed on re-run", key);
    }

    // Gates short-circuit: one evaluation each
    assert_eq!(cluster.evaluations(&data_tier_check()).await, polls_first + 1);
    assert_eq!(second.ctx.endpoint(), Some(LB_HOSTNAME));

    // The log describes the second run only
    assert_eq!(second.ctx.log().len(), plan.len());
    assert!(second.ctx.log().iter().all(|r| r.attempts == 1));
}

#[tokio::test]
async fn test_rerun_recreating_schema_job_applies_it_again() {
    let options = rollout::plan::ThreeTierOptions {
        recreate_schema_job: true,
        ..quick_options()
    };
    let plan = rollout::plan::three_tier_plan(&options).unwrap();
    let cluster = Arc::new(healthy_cluster());

    let first = run_plan(&plan, cluster.clone()).await;
    assert_run_status(&first, RunStatus::Completed);
    let applied_first = cluster.apply_log().await.len();

    let second = run_plan(&plan, cluster.clone()).await;
    assert_run_status(&second, RunStatus::Completed);

    let log = cluster.apply_log().await;
    let job = format!("job/{}/schema-init", NAMESPACE);
    let reapplied: Vec<_> = log[applied_first..]
        .iter()
        .filter(|(key, _)| *key != job)
        .collect();
    assert!(reapplied.iter().all(|(_, result)| *result == ApplyOutcome::Unchanged));
    assert!(log[applied_first..].contains(&(job, ApplyOutcome::Applied)));
}
