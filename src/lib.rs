//! rollout - application-tier deployment orchestration for a provisioned cluster

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod plan;
pub mod platform;

// Re-export commonly used types
pub use crate::core::{
    Condition, ConditionCheck, DeployError, DeploymentPlan, ErrorKind, ResourceDefinition, RunContext, RunStatus,
    Step, StepAction, StepOutcome, StepResult, TargetIdentity,
};
pub use crate::execution::{
    Backoff, CancelHandle, ExecutionEvent, Orchestrator, ReadinessGate, RetryPolicy, RetrySpec, SchedulingStrategy,
    StepExecutor,
};
pub use crate::platform::{InMemoryCluster, Platform};
