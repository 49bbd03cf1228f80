//! Test: no step starts before its prerequisites succeed

use crate::helpers::*;
use rollout::core::RunStatus;
use rollout::execution::SchedulingStrategy;
use std::sync::Arc;

fn assert_dependencies_respected(outcome: &RunOutcome, plan: &rollout::core::DeploymentPlan) {
    for step in plan.ordered_steps() {
        let Some(started) = outcome.started_at(&step.id) else {
            continue;
        };
        for dep in &step.dependencies {
            let finished = outcome
                .finished_at(dep)
                .unwrap_or_else(|| panic!("{} started before {} finished", step.id, dep));
            assert!(finished < started, "{} started before {} finished", step.id, dep);
        }
    }
}

#[tokio::test]
async fn test_sequential_follows_execution_order() {
    let plan = quick_plan();
    let outcome = run_plan(&plan, Arc::new(healthy_cluster())).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_eq!(outcome.start_order(), plan.execution_order().to_vec());
    assert_dependencies_respected(&outcome, &plan);

    // Log order matches execution order
    let logged: Vec<_> = outcome.ctx.log().iter().map(|r| r.step_id.clone()).collect();
    assert_eq!(logged, plan.execution_order().to_vec());
}

#[tokio::test]
async fn test_parallel_branches_join_before_consumers() {
    let plan = quick_plan();
    let cluster = Arc::new(healthy_cluster());

    let outcome = run_with_context(&plan, cluster, context(&plan), SchedulingStrategy::Parallel).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_dependencies_respected(&outcome, &plan);

    // The controller and the namespace are independent; the ingress needs both
    let ingress = outcome.started_at("ingress").unwrap();
    assert!(outcome.finished_at("load-balancer-controller").unwrap() < ingress);
    assert!(outcome.finished_at("frontend").unwrap() < ingress);
}

#[tokio::test]
async fn test_limited_parallel_completes() {
    let plan = quick_plan();
    let outcome = run_with_context(
        &plan,
        Arc::new(healthy_cluster()),
        context(&plan),
        SchedulingStrategy::LimitedParallel(2),
    )
    .await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_dependencies_respected(&outcome, &plan);
    assert_eq!(outcome.ctx.log().len(), plan.len());
}
