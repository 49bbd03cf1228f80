//! Test: plans loaded from YAML run the same way as the built-in one

use crate::helpers::*;
use rollout::core::config::DeploymentConfig;
use rollout::core::{RunContext, RunStatus, StepOutcome, TargetIdentity};
use rollout::execution::SchedulingStrategy;
use std::sync::Arc;

const WEB_PLAN: &str = r#"
name: "web"
namespace: "web"

variables:
  image: "registry/web:2.1"

defaults:
  timeout_secs: 30
  retry:
    max_attempts: 2
    backoff: fixed
    base_delay_ms: 1

steps:
  - id: "namespace"
    apply:
      resources:
        - kind: namespace
          name: web

  - id: "app"
    depends_on: ["namespace"]
    apply:
      resources:
        - kind: deployment
          name: web
          image: "{{ image }}"
          port: 8080
        - kind: service
          name: web
          selector: web
          port: 80
          target_port: 8080
    gate:
      type: deployment_available
      namespace: web
      name: web
      poll_interval_secs: 0.005
      deadline_secs: 1

  - id: "ingress"
    depends_on: ["app"]
    apply:
      resources:
        - kind: ingress
          name: web
          routes:
            - path: "/"
              service: web
              port: 80

  - id: "endpoint"
    depends_on: ["ingress"]
    exposure: true
    wait:
      type: ingress_address
      namespace: web
      name: web
      poll_interval_secs: 0.005
      deadline_secs: 1
"#;

fn web_context(config: &DeploymentConfig) -> RunContext {
    let mut ctx = RunContext::new("web", TargetIdentity::new(CLUSTER, REGION, "web"));
    for (key, value) in config.variables_as_string_map() {
        ctx.set_variable(key, value);
    }
    ctx
}

#[tokio::test]
async fn test_yaml_plan_deploys() {
    let config = DeploymentConfig::from_yaml(WEB_PLAN).unwrap();
    let plan = config.to_plan(None).unwrap();
    let cluster = Arc::new(healthy_cluster());

    let outcome = run_with_context(&plan, cluster.clone(), web_context(&config), SchedulingStrategy::Sequential).await;

    assert_run_status(&outcome, RunStatus::Completed);
    assert_eq!(outcome.ctx.endpoint(), Some(LB_HOSTNAME));

    let deployment = cluster.object("deployment/web/web").await.unwrap();
    assert_eq!(
        deployment["spec"]["template"]["spec"]["containers"][0]["image"],
        "registry/web:2.1"
    );
    assert!(cluster.object("service/web/web").await.is_some());
    assert!(cluster.object("ingress/web/web").await.is_some());
}

#[tokio::test]
async fn test_yaml_defaults_retry_applies_to_steps() {
    let config = DeploymentConfig::from_yaml(WEB_PLAN).unwrap();
    let plan = config.to_plan(None).unwrap();
    let cluster = Arc::new(healthy_cluster().fail_apply(
        "web",
        [rollout::core::DeployError::TransientInfra("Throttling: Rate exceeded".into())],
    ));

    let outcome = run_with_context(&plan, cluster, web_context(&config), SchedulingStrategy::Sequential).await;

    assert_run_status(&outcome, RunStatus::Completed);
    // The namespace is also named "web" and absorbs the single failure
    assert_step(&outcome, "namespace", StepOutcome::Succeeded);
    assert_eq!(outcome.attempts("namespace"), 2);
    assert_eq!(outcome.attempts("app"), 1);
}

#[tokio::test]
async fn test_yaml_plan_in_another_namespace_is_rejected_when_misordered() {
    let yaml = r#"
name: "misordered"
steps:
  - id: "app"
    apply:
      resources:
        - kind: deployment
          name: web
          namespace: web
          image: "registry/web:2.1"
  - id: "namespace"
    apply:
      resources:
        - kind: namespace
          name: web
"#;
    let config = DeploymentConfig::from_yaml(yaml).unwrap();
    let err = config.to_plan(None).unwrap_err();
    assert!(err.to_string().contains("creates its namespace"), "{}", err);
}
