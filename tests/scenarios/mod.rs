//! Scenario-based tests for rollout

mod cancellation;
mod endpoint_warning;
mod fatal_abort;
mod idempotent_rerun;
mod ordering;
mod readiness_gating;
mod retry_termination;
mod transient_retry;
mod yaml_plan;
