//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run has not started
    Pending,
    /// Steps are being executed
    Running,
    /// Every step succeeded and the endpoint was discovered
    Completed,
    /// Infrastructure applied, but something (usually the endpoint) is not confirmed yet
    CompletedWithWarning,
    /// A step failed or the run was cancelled
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::CompletedWithWarning | RunStatus::Aborted
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::CompletedWithWarning)
    }

    /// Process exit code for this status
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Final outcome of a step within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    /// Not attempted (run halted, or prerequisite did not succeed)
    Skipped,
    /// Interrupted by cancellation while in flight
    Aborted,
}

/// Record of one step's execution, appended to the run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub outcome: StepOutcome,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// Captured output or error text
    #[serde(default)]
    pub diagnostic: Option<String>,

    /// Set when the step succeeded with a soft failure (e.g. endpoint not confirmed)
    #[serde(default)]
    pub warning: Option<String>,

    /// Values discovered by the step
    #[serde(default)]
    pub outputs: HashMap<String, String>,
}

impl StepResult {
    pub fn succeeded(step_id: impl Into<String>, attempts: u32, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            step_id: step_id.into(),
            outcome: StepOutcome::Succeeded,
            attempts,
            started_at,
            duration,
            diagnostic: None,
            warning: None,
            outputs: HashMap::new(),
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        attempts: u32,
        started_at: DateTime<Utc>,
        duration: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            outcome: StepOutcome::Failed,
            diagnostic: Some(error.into()),
            ..Self::succeeded(step_id, attempts, started_at, duration)
        }
    }

    pub fn skipped(step_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            outcome: StepOutcome::Skipped,
            diagnostic: Some(reason.into()),
            ..Self::succeeded(step_id, 0, Utc::now(), Duration::ZERO)
        }
    }

    pub fn aborted(step_id: impl Into<String>, attempts: u32, started_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            outcome: StepOutcome::Aborted,
            diagnostic: Some("cancelled".to_string()),
            ..Self::succeeded(step_id, attempts, started_at, duration)
        }
    }

    pub fn with_diagnostic(mut self, diagnostic: impl Into<String>) -> Self {
        self.diagnostic = Some(diagnostic.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Succeeded
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
