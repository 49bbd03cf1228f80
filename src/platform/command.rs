//! Subprocess command runner

use super::{CommandOutput, CommandRunner};
use crate::core::{error::DeployError, step::CommandSpec};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// stderr fragments that indicate the failure is worth retrying
const TRANSIENT_MARKERS: &[&str] = &[
    "Throttling",
    "TooManyRequests",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "connection refused",
    "connection reset",
    "i/o timeout",
    "TLS handshake timeout",
    "the server is currently unable to handle the request",
    "etcdserver: request timed out",
];

/// Classify a failed command's stderr
pub fn classify_failure(program: &str, exit_code: Option<i32>, stderr: &str) -> DeployError {
    let stderr = stderr.trim();
    let lower = stderr.to_lowercase();
    if TRANSIENT_MARKERS
        .iter()
        .any(|m| lower.contains(&m.to_lowercase()))
    {
        DeployError::TransientInfra(format!("{}: {}", program, stderr))
    } else {
        DeployError::execution(format!("{}: {}", program, stderr), exit_code)
    }
}

/// Runs commands as child processes
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner;

impl SubprocessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn spawn(
        &self,
        command: &CommandSpec,
        input: Option<&str>,
        limit: Duration,
    ) -> Result<CommandOutput, DeployError> {
        debug!("Running: {}", command.display());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(&command.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                DeployError::Configuration(format!("{} not found on PATH", command.program))
            }
            _ => DeployError::execution(format!("failed to spawn {}: {}", command.program, e), None),
        })?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| DeployError::execution(format!("failed to write stdin: {}", e), None))?;
            // Close stdin so the child sees EOF
            drop(stdin);
        }

        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                DeployError::execution(
                    format!("{} timed out after {}s", command.program, limit.as_secs()),
                    None,
                )
            })?
            .map_err(|e| DeployError::execution(format!("{} failed: {}", command.program, e), None))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let exit_code = output.status.code();
            warn!(
                "{} exited with code {}: {}",
                command.program,
                exit_code.unwrap_or(-1),
                stderr.trim()
            );
            return Err(classify_failure(&command.program, exit_code, &stderr));
        }

        debug!("{} returned {} bytes of output", command.program, stdout.len());
        Ok(CommandOutput { stdout, stderr })
    }
}

#[async_trait]
impl CommandRunner for SubprocessRunner {
    async fn run(&self, command: &CommandSpec, timeout: Duration) -> Result<CommandOutput, DeployError> {
        self.spawn(command, None, timeout).await
    }

    async fn run_with_input(
        &self,
        command: &CommandSpec,
        input: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, DeployError> {
        self.spawn(command, Some(input), timeout).await
    }
}
