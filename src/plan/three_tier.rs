//! The three-tier application plan: load balancer controller, database
//! wiring, schema initialization, backend, frontend and public ingress
//!
//! Values that come from the provisioned infrastructure are left as
//! placeholders and rendered from the run context:
//! `cluster_name`, `region`, `vpc_id`, `db_endpoint` and `secret_ref`.

use crate::core::{
    condition::{Condition, ConditionCheck},
    context::ENDPOINT_OUTPUT,
    pipeline::DeploymentPlan,
    resource::{IngressRoute, IngressSpec, ResourceDefinition, SecretData, ServiceSpec, Workload},
    step::{CommandSpec, Step, StepAction},
};
use crate::execution::retry::{Backoff, RetrySpec};
use anyhow::Result;
use std::collections::BTreeMap;
use std::time::Duration;

pub const PLAN_NAME: &str = "three-tier";

const LB_CONTROLLER: &str = "aws-load-balancer-controller";
const DB_SECRET: &str = "db-credentials";
const APP_CONFIG: &str = "app-config";
const DB_PORT: u16 = 5432;

/// Knobs for the built-in plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeTierOptions {
    pub namespace: String,
    pub backend_image: String,
    pub frontend_image: String,
    /// Image that runs the schema migration; defaults to the backend image
    pub migration_image: Option<String>,
    pub backend_port: u16,
    pub frontend_port: u16,
    pub replicas: u32,
    pub database_name: String,
    pub database_user: String,
    /// Delete and re-create the schema job on every run
    pub recreate_schema_job: bool,
    /// Deadline for the public address to appear
    pub endpoint_deadline: Duration,
    /// Overrides the poll interval of every readiness condition
    pub poll_interval: Option<Duration>,
    /// First retry delay; later retries back off exponentially
    pub retry_base_delay: Duration,
}

impl Default for ThreeTierOptions {
    fn default() -> Self {
        Self {
            namespace: "three-tier".to_string(),
            backend_image: "three-tier/backend:latest".to_string(),
            frontend_image: "three-tier/frontend:latest".to_string(),
            migration_image: None,
            backend_port: 3000,
            frontend_port: 80,
            replicas: 2,
            database_name: "threetierdb".to_string(),
            database_user: "dbadmin".to_string(),
            recreate_schema_job: false,
            endpoint_deadline: Duration::from_secs(300),
            poll_interval: None,
            retry_base_delay: Duration::from_secs(5),
        }
    }
}

fn apply(resources: Vec<ResourceDefinition>) -> StepAction {
    StepAction::Apply {
        resources,
        recreate: false,
    }
}

impl ThreeTierOptions {
    fn retry(&self) -> RetrySpec {
        RetrySpec::new(3, Backoff::exponential(self.retry_base_delay, Duration::from_secs(60)))
    }

    fn condition(&self, check: ConditionCheck, poll_interval: Duration, deadline: Duration) -> Condition {
        Condition::new(check)
            .with_poll_interval(self.poll_interval.unwrap_or(poll_interval))
            .with_deadline(deadline)
    }
}

/// Build the three-tier plan
pub fn three_tier_plan(options: &ThreeTierOptions) -> Result<DeploymentPlan> {
    DeploymentPlan::new(PLAN_NAME, three_tier_steps(options))
}

/// The plan's steps in declaration order
pub fn three_tier_steps(options: &ThreeTierOptions) -> Vec<Step> {
    let ns = options.namespace.as_str();

    let kubeconfig = Step::new(
        "kubeconfig",
        StepAction::Command(
            CommandSpec::new(
                "aws",
                [
                    "eks",
                    "update-kubeconfig",
                    "--name",
                    "{{ cluster_name }}",
                    "--region",
                    "{{ region }}",
                ],
            )
            .repeatable(),
        ),
    )
    .named("Configure cluster access")
    .with_retry(options.retry());

    let lb_controller = Step::new(
        "load-balancer-controller",
        StepAction::Command(
            CommandSpec::new(
                "helm",
                [
                    "upgrade",
                    "--install",
                    LB_CONTROLLER,
                    "eks/aws-load-balancer-controller",
                    "-n",
                    "kube-system",
                    "--set",
                    "clusterName={{ cluster_name }}",
                    "--set",
                    "serviceAccount.create=false",
                    "--set",
                    "serviceAccount.name=aws-load-balancer-controller",
                    "--set",
                    "region={{ region }}",
                    "--set",
                    "vpcId={{ vpc_id }}",
                    "--wait",
                ],
            )
            .repeatable(),
        ),
    )
    .named("Install load balancer controller")
    .after(["kubeconfig"])
    .with_timeout(Duration::from_secs(600))
    .with_retry(options.retry())
    .gated(options.condition(
        ConditionCheck::DeploymentAvailable {
            namespace: "kube-system".to_string(),
            name: LB_CONTROLLER.to_string(),
        },
        Duration::from_secs(10),
        Duration::from_secs(300),
    ));

    let namespace = Step::new("namespace", apply(vec![ResourceDefinition::namespace(ns)]))
        .named("Create application namespace")
        .after(["kubeconfig"])
        .with_retry(options.retry());

    let database_config = Step::new(
        "database-config",
        apply(vec![
            ResourceDefinition::secret(DB_SECRET, SecretData::FromReference("{{ secret_ref }}".to_string()))
                .in_namespace(ns),
            ResourceDefinition::config_map(APP_CONFIG, app_config(options)).in_namespace(ns),
        ]),
    )
    .named("Database credentials and app config")
    .after(["namespace"])
    .with_retry(options.retry());

    let data_tier = Step::new(
        "data-tier",
        StepAction::Wait(options.condition(
            ConditionCheck::TcpAccepts {
                host: "{{ db_endpoint }}".to_string(),
                port: DB_PORT,
            },
            Duration::from_secs(10),
            Duration::from_secs(600),
        )),
    )
    .named("Wait for database")
    .after(["database-config"]);

    let migration_image = options
        .migration_image
        .clone()
        .unwrap_or_else(|| options.backend_image.clone());
    let schema_init = Step::new(
        "schema-init",
        StepAction::Apply {
            resources: vec![ResourceDefinition::job(
                "schema-init",
                Workload::new(migration_image)
                    .with_command(["npm", "run", "migrate"])
                    .with_secret_env(DB_SECRET)
                    .with_config_map_env(APP_CONFIG),
            )
            .in_namespace(ns)],
            recreate: options.recreate_schema_job,
        },
    )
    .named("Initialize database schema")
    .after(["data-tier"])
    .with_retry(options.retry())
    .gated(options.condition(
        ConditionCheck::JobComplete {
            namespace: ns.to_string(),
            name: "schema-init".to_string(),
        },
        Duration::from_secs(5),
        Duration::from_secs(300),
    ));

    let backend = Step::new(
        "backend",
        apply(vec![
            ResourceDefinition::deployment(
                "backend",
                options.replicas,
                Workload::new(&options.backend_image)
                    .with_port(options.backend_port)
                    .with_env("PORT", options.backend_port.to_string())
                    .with_secret_env(DB_SECRET)
                    .with_config_map_env(APP_CONFIG),
            )
            .in_namespace(ns),
            ResourceDefinition::service(
                "backend",
                ServiceSpec {
                    selector: "backend".to_string(),
                    port: options.backend_port,
                    target_port: options.backend_port,
                    service_type: "ClusterIP".to_string(),
                },
            )
            .in_namespace(ns),
        ]),
    )
    .named("Deploy backend")
    .after(["schema-init"])
    .with_retry(options.retry())
    .gated(available(options, "backend"));

    let frontend = Step::new(
        "frontend",
        apply(vec![
            ResourceDefinition::deployment(
                "frontend",
                options.replicas,
                Workload::new(&options.frontend_image)
                    .with_port(options.frontend_port)
                    .with_env("API_URL", "/api"),
            )
            .in_namespace(ns),
            ResourceDefinition::service(
                "frontend",
                ServiceSpec {
                    selector: "frontend".to_string(),
                    port: 80,
                    target_port: options.frontend_port,
                    service_type: "ClusterIP".to_string(),
                },
            )
            .in_namespace(ns),
        ]),
    )
    .named("Deploy frontend")
    .after(["backend"])
    .with_retry(options.retry())
    .gated(available(options, "frontend"));

    let ingress = Step::new(
        "ingress",
        apply(vec![ResourceDefinition::ingress("three-tier", ingress_spec(options)).in_namespace(ns)]),
    )
    .named("Expose application")
    .after(["frontend", "load-balancer-controller"])
    .with_retry(options.retry());

    let endpoint = Step::new(
        "endpoint",
        StepAction::Wait(options.condition(
            ConditionCheck::IngressAddress {
                namespace: ns.to_string(),
                name: "three-tier".to_string(),
            },
            Duration::from_secs(15),
            options.endpoint_deadline,
        )),
    )
    .named("Discover public endpoint")
    .after(["ingress"])
    .exposing(ENDPOINT_OUTPUT);

    vec![
        kubeconfig,
        lb_controller,
        namespace,
        database_config,
        data_tier,
        schema_init,
        backend,
        frontend,
        ingress,
        endpoint,
    ]
}

fn available(options: &ThreeTierOptions, name: &str) -> Condition {
    options.condition(
        ConditionCheck::DeploymentAvailable {
            namespace: options.namespace.clone(),
            name: name.to_string(),
        },
        Duration::from_secs(5),
        Duration::from_secs(300),
    )
}

fn app_config(options: &ThreeTierOptions) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("DB_HOST".to_string(), "{{ db_endpoint }}".to_string()),
        ("DB_PORT".to_string(), DB_PORT.to_string()),
        ("DB_NAME".to_string(), options.database_name.clone()),
        ("DB_USER".to_string(), options.database_user.clone()),
    ])
}

fn ingress_spec(options: &ThreeTierOptions) -> IngressSpec {
    let annotations = [
        ("alb.ingress.kubernetes.io/scheme", "internet-facing"),
        ("alb.ingress.kubernetes.io/target-type", "ip"),
        ("alb.ingress.kubernetes.io/healthcheck-path", "/"),
    ];
    IngressSpec {
        class_name: Some("alb".to_string()),
        annotations: annotations
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        routes: vec![
            IngressRoute {
                path: "/api".to_string(),
                service: "backend".to_string(),
                port: options.backend_port,
            },
            IngressRoute {
                path: "/".to_string(),
                service: "frontend".to_string(),
                port: 80,
            },
        ],
    }
}
