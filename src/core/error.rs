//! Deployment error taxonomy

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by steps, appliers, probes and the retry layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeployError {
    /// Expected to clear up on retry (throttling, LB not provisioned yet, ...)
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    /// Malformed definition or missing required variable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Infrastructure applied but the condition was not confirmed in time
    #[error("readiness timeout waiting for {condition} (last observed: {last_observed})")]
    ReadinessTimeout {
        condition: String,
        last_observed: String,
    },

    /// A sub-step's action returned failure
    #[error("execution failed: {cause}{}", exit_status.map(|c| format!(" (exit status {})", c)).unwrap_or_default())]
    Execution {
        cause: String,
        exit_status: Option<i32>,
    },

    /// Caller-initiated abort
    #[error("cancelled")]
    Cancelled,
}

/// Discriminant of [`DeployError`], used in config to name retryable kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientInfra,
    Configuration,
    ReadinessTimeout,
    Execution,
    Cancelled,
}

/// Classification used by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Fatal,
}

impl DeployError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeployError::TransientInfra(_) => ErrorKind::TransientInfra,
            DeployError::Configuration(_) => ErrorKind::Configuration,
            DeployError::ReadinessTimeout { .. } => ErrorKind::ReadinessTimeout,
            DeployError::Execution { .. } => ErrorKind::Execution,
            DeployError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Default classification: only `TransientInfra` is worth retrying
    pub fn default_class(&self) -> ErrorClass {
        match self {
            DeployError::TransientInfra(_) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        }
    }

    pub fn execution(cause: impl Into<String>, exit_status: Option<i32>) -> Self {
        DeployError::Execution {
            cause: cause.into(),
            exit_status,
        }
    }
}
