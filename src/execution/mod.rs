//! Deployment execution: orchestration, step execution, retries and readiness gates

pub mod cancel;
pub mod engine;
pub mod executor;
pub mod gate;
pub mod retry;
pub mod scheduler;

pub use cancel::{CancelHandle, CancelSignal};
pub use engine::{EventHandler, ExecutionEvent, Orchestrator};
pub use executor::StepExecutor;
pub use gate::{GateOutcome, ReadinessGate};
pub use retry::{Backoff, Classifier, RetryError, RetryPolicy, RetrySpec};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
