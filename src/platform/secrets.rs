//! Secret store resolvers

use super::{CommandRunner, SecretResolver};
use crate::core::{error::DeployError, step::CommandSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Parse a secret string holding a flat JSON object into key/value pairs
pub fn parse_secret_string(reference: &str, raw: &str) -> Result<BTreeMap<String, String>, DeployError> {
    let value: Value = serde_json::from_str(raw.trim()).map_err(|e| {
        DeployError::Configuration(format!("secret {} is not a JSON object: {}", reference, e))
    })?;
    let Value::Object(map) = value else {
        return Err(DeployError::Configuration(format!(
            "secret {} is not a JSON object",
            reference
        )));
    };

    Ok(map
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

/// Reads secrets from AWS Secrets Manager through the `aws` CLI
pub struct AwsSecretsResolver {
    runner: Arc<dyn CommandRunner>,
    region: String,
}

impl AwsSecretsResolver {
    pub fn new(runner: Arc<dyn CommandRunner>, region: impl Into<String>) -> Self {
        Self {
            runner,
            region: region.into(),
        }
    }
}

#[async_trait]
impl SecretResolver for AwsSecretsResolver {
    async fn resolve(&self, reference: &str) -> Result<BTreeMap<String, String>, DeployError> {
        let cmd = CommandSpec::new(
            "aws",
            [
                "secretsmanager",
                "get-secret-value",
                "--secret-id",
                reference,
                "--region",
                self.region.as_str(),
                "--query",
                "SecretString",
                "--output",
                "text",
            ],
        );
        let output = self.runner.run(&cmd, Duration::from_secs(60)).await?;
        parse_secret_string(reference, &output.stdout)
    }
}
