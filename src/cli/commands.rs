//! CLI command definitions

use crate::core::{
    config::{DeploymentConfig, InfraOutputs},
    DeploymentPlan, RunContext, TargetIdentity, RESERVED_VARIABLES,
};
use crate::execution::SchedulingStrategy;
use crate::plan::{three_tier_plan, ThreeTierOptions};
use anyhow::{Context, Result};
use clap::Args;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Deploy the application tier onto a provisioned cluster
#[derive(Debug, Args, Clone)]
pub struct DeployCommand {
    /// Target cluster name
    pub cluster: String,

    /// Target region
    pub region: String,

    /// Identifier of the database credential in the secret store
    /// (defaults to the DatabaseSecretArn stack output)
    pub secret_ref: Option<String>,

    #[command(flatten)]
    pub plan: PlanSource,

    /// Stack outputs JSON written by the infrastructure deploy
    #[arg(long)]
    pub outputs_file: Option<String>,

    /// Stack to read from the outputs file (required if it has several)
    #[arg(long)]
    pub stack: Option<String>,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variables: Vec<(String, String)>,

    /// Scheduling strategy: sequential, parallel or parallel:N
    #[arg(long, default_value = "sequential")]
    pub strategy: SchedulingStrategy,

    /// Run against an in-memory cluster instead of the real one
    #[arg(long)]
    pub dry_run: bool,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Where the plan comes from: a YAML file or the built-in three-tier plan
#[derive(Debug, Args, Clone)]
pub struct PlanSource {
    /// Path to a deployment plan YAML file (defaults to the built-in plan)
    #[arg(short, long)]
    pub file: Option<String>,

    /// Target namespace
    #[arg(short, long, default_value = "three-tier")]
    pub namespace: String,

    /// Backend image (built-in plan)
    #[arg(long)]
    pub backend_image: Option<String>,

    /// Frontend image (built-in plan)
    #[arg(long)]
    pub frontend_image: Option<String>,

    /// Seconds to wait for the public address (built-in plan)
    #[arg(long, value_parser = parse_seconds)]
    pub endpoint_timeout: Option<Duration>,

    /// Delete and re-create the schema job on every run (built-in plan)
    #[arg(long)]
    pub recreate_schema_job: bool,
}

impl PlanSource {
    /// Load the plan and the variables it declares
    pub fn load(&self) -> Result<(DeploymentPlan, HashMap<String, String>)> {
        match &self.file {
            Some(path) => {
                let config = DeploymentConfig::from_file(path)
                    .with_context(|| format!("Failed to load deployment plan {}", path))?;
                let plan = config.to_plan(Some(&self.namespace))?;
                Ok((plan, config.variables_as_string_map()))
            }
            None => Ok((three_tier_plan(&self.three_tier_options())?, HashMap::new())),
        }
    }

    pub fn three_tier_options(&self) -> ThreeTierOptions {
        let mut options = ThreeTierOptions {
            namespace: self.namespace.clone(),
            recreate_schema_job: self.recreate_schema_job,
            ..Default::default()
        };
        if let Some(image) = &self.backend_image {
            options.backend_image = image.clone();
        }
        if let Some(image) = &self.frontend_image {
            options.frontend_image = image.clone();
        }
        if let Some(timeout) = self.endpoint_timeout {
            options.endpoint_deadline = timeout;
        }
        options
    }
}

impl DeployCommand {
    /// Build the run context: plan variables, then stack outputs, then `--var` overrides
    ///
    /// The positional cluster name always wins over the stack output.
    pub fn build_context(&self, plan: &DeploymentPlan, plan_variables: HashMap<String, String>) -> Result<RunContext> {
        let target = TargetIdentity::new(&self.cluster, &self.region, &self.plan.namespace);
        let mut ctx = RunContext::new(plan.name.clone(), target);

        for (key, value) in plan_variables {
            if RESERVED_VARIABLES.contains(&key.as_str()) {
                warn!("Plan variable {} is set from the deploy target; ignoring plan value", key);
                continue;
            }
            ctx.set_variable(key, value);
        }

        let mut secret_ref = self.secret_ref.clone();
        if let Some(path) = &self.outputs_file {
            let outputs = InfraOutputs::from_file(path, self.stack.as_deref())?;
            if let Some(cluster) = outputs.cluster_name.as_deref() {
                if cluster != self.cluster {
                    warn!(
                        "Stack outputs name cluster {} but {} was given; using {}",
                        cluster, self.cluster, self.cluster
                    );
                }
            }
            for (key, value) in outputs.variables() {
                if key != "cluster_name" {
                    ctx.set_variable(key, value);
                }
            }
            if secret_ref.is_none() {
                secret_ref = outputs.database_secret_arn.clone();
            }
        }

        if let Some(reference) = secret_ref {
            ctx = ctx.with_secret_ref(reference);
        }

        for (key, value) in &self.variables {
            if RESERVED_VARIABLES.contains(&key.as_str()) {
                anyhow::bail!(
                    "--var {} is not allowed; set the cluster, region, secret reference and --namespace directly",
                    key
                );
            }
            info!("Variable override: {} = {}", key, value);
            ctx.set_variable(key.clone(), value.clone());
        }

        Ok(ctx)
    }
}

/// Validate a deployment plan
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    #[command(flatten)]
    pub plan: PlanSource,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the resolved step order of a plan
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    #[command(flatten)]
    pub plan: PlanSource,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Plan name to filter by
    #[arg(short, long)]
    pub plan: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show the full step log
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}

/// Parse a whole number of seconds
pub fn parse_seconds(s: &str) -> Result<Duration, String> {
    s.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("Invalid number of seconds: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("image=repo/app:1.2=rc"),
            Ok(("image".to_string(), "repo/app:1.2=rc".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    fn deploy_command(secret_ref: Option<&str>, outputs_file: Option<String>) -> DeployCommand {
        DeployCommand {
            cluster: "prod".to_string(),
            region: "eu-west-1".to_string(),
            secret_ref: secret_ref.map(str::to_string),
            plan: PlanSource {
                file: None,
                namespace: "three-tier".to_string(),
                backend_image: Some("repo/backend:2".to_string()),
                frontend_image: None,
                endpoint_timeout: None,
                recreate_schema_job: false,
            },
            outputs_file,
            stack: None,
            variables: vec![("db_endpoint".to_string(), "override.internal".to_string())],
            strategy: SchedulingStrategy::Sequential,
            dry_run: true,
            no_history: true,
        }
    }

    #[test]
    fn test_build_context_layers_outputs_and_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outputs.json");
        std::fs::write(
            &path,
            r#"{"ThreeTierEksStack": {
                "ClusterName": "prod",
                "DatabaseEndpoint": "db.internal",
                "DatabaseSecretArn": "arn:secret:db",
                "VpcId": "vpc-123"
            }}"#,
        )
        .unwrap();

        let cmd = deploy_command(None, Some(path.to_string_lossy().into_owned()));
        let (plan, vars) = cmd.plan.load().unwrap();
        let ctx = cmd.build_context(&plan, vars).unwrap();

        assert_eq!(ctx.get_variable("cluster_name").map(String::as_str), Some("prod"));
        assert_eq!(ctx.get_variable("vpc_id").map(String::as_str), Some("vpc-123"));
        assert_eq!(ctx.get_variable("db_endpoint").map(String::as_str), Some("override.internal"));
        assert_eq!(ctx.secret_ref.as_deref(), Some("arn:secret:db"));
    }

    #[test]
    fn test_reserved_variable_override_rejected() {
        for key in ["cluster_name", "secret_ref"] {
            let mut cmd = deploy_command(Some("arn:given"), None);
            cmd.variables.push((key.to_string(), "other".to_string()));
            let (plan, vars) = cmd.plan.load().unwrap();

            let err = cmd.build_context(&plan, vars).unwrap_err();
            assert!(err.to_string().contains(key), "{}", err);
        }
    }

    #[test]
    fn test_plan_variables_cannot_retarget() {
        let cmd = deploy_command(Some("arn:given"), None);
        let (plan, _) = cmd.plan.load().unwrap();
        let vars = HashMap::from([
            ("namespace".to_string(), "elsewhere".to_string()),
            ("backend_replicas".to_string(), "3".to_string()),
        ]);

        let ctx = cmd.build_context(&plan, vars).unwrap();

        assert_eq!(ctx.get_variable("namespace").map(String::as_str), Some("three-tier"));
        assert_eq!(ctx.target.namespace, "three-tier");
        assert_eq!(ctx.get_variable("backend_replicas").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_positional_secret_ref_wins() {
        let cmd = deploy_command(Some("arn:given"), None);
        let (plan, vars) = cmd.plan.load().unwrap();
        let ctx = cmd.build_context(&plan, vars).unwrap();
        assert_eq!(ctx.secret_ref.as_deref(), Some("arn:given"));
        assert_eq!(ctx.target.namespace, "three-tier");
    }

    #[test]
    fn test_built_in_plan_options() {
        let cmd = deploy_command(None, None);
        let options = cmd.plan.three_tier_options();
        assert_eq!(options.backend_image, "repo/backend:2");
        assert_eq!(options.frontend_image, ThreeTierOptions::default().frontend_image);
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("90"), Ok(Duration::from_secs(90)));
        assert!(parse_seconds("soon").is_err());
    }
}
