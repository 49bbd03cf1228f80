//! Orchestrator - sequences a deployment plan to a terminal run status

use crate::{
    core::{
        error::DeployError,
        state::{RunStatus, StepOutcome, StepResult},
        DeploymentPlan, RunContext,
    },
    execution::{
        cancel::{CancelHandle, CancelSignal},
        ExecutionScheduler, SchedulingStrategy, StepExecutor,
    },
    platform::Platform,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during a deployment run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        plan_name: String,
        total_steps: usize,
    },
    StepStarted {
        step_id: String,
        name: String,
    },
    StepRetrying {
        step_id: String,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    },
    StepFinished {
        result: StepResult,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        endpoint: Option<String>,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

fn emit(handlers: &[EventHandler], event: ExecutionEvent) {
    for handler in handlers {
        handler(event.clone());
    }
}

/// Top-level sequencer for a deployment run
pub struct Orchestrator {
    scheduler: ExecutionScheduler,
    executor: Arc<StepExecutor>,
    event_handlers: Arc<Vec<EventHandler>>,
    cancel: CancelHandle,
}

impl Orchestrator {
    pub fn new(platform: Platform, strategy: SchedulingStrategy) -> Self {
        let (cancel, signal) = CancelHandle::new();
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(StepExecutor::new(platform, signal)),
            event_handlers: Arc::new(Vec::new()),
            cancel,
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.event_handlers).push(Arc::new(handler));
    }

    /// Handle that aborts the run; in-flight steps are recorded as aborted
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.signal()
    }

    /// Execute the plan against the context, returning the terminal status
    ///
    /// The context's step log is written only here, in plan order within
    /// each concurrently dispatched batch.
    pub async fn run(&self, plan: &DeploymentPlan, ctx: &mut RunContext) -> RunStatus {
        info!("Starting deployment run: {} ({})", plan.name, ctx.run_id);
        ctx.start();
        emit(
            &self.event_handlers,
            ExecutionEvent::RunStarted {
                run_id: ctx.run_id,
                plan_name: plan.name.clone(),
                total_steps: plan.len(),
            },
        );

        let mut succeeded: HashSet<String> = HashSet::new();
        let mut finished: HashSet<String> = HashSet::new();
        let mut halted_by: Option<String> = None;

        while halted_by.is_none() {
            if self.cancel.is_cancelled() {
                break;
            }

            let batch = self.scheduler.next_steps(plan, &succeeded, &finished);
            if batch.is_empty() {
                break;
            }

            let variables = ctx.rendering_variables();
            let results = self.run_batch(plan, &batch, variables).await;

            for result in results {
                finished.insert(result.step_id.clone());
                match result.outcome {
                    StepOutcome::Succeeded => {
                        succeeded.insert(result.step_id.clone());
                    }
                    StepOutcome::Failed | StepOutcome::Aborted => {
                        if halted_by.is_none() {
                            halted_by = Some(result.step_id.clone());
                        }
                    }
                    StepOutcome::Skipped => {}
                }
                emit(
                    &self.event_handlers,
                    ExecutionEvent::StepFinished { result: result.clone() },
                );
                ctx.record(result);
            }
        }

        // Everything not attempted is recorded with zero attempts
        let reason = match (&halted_by, self.cancel.is_cancelled()) {
            (Some(step), _) => format!("not run: step '{}' did not succeed", step),
            (None, true) => "not run: deployment cancelled".to_string(),
            (None, false) => "not run: prerequisites did not succeed".to_string(),
        };
        for step in plan.ordered_steps() {
            if !finished.contains(&step.id) {
                let skipped = StepResult::skipped(&step.id, reason.clone());
                emit(
                    &self.event_handlers,
                    ExecutionEvent::StepFinished { result: skipped.clone() },
                );
                ctx.record(skipped);
            }
        }

        let status = self.final_status(plan, ctx, halted_by.is_some());
        match status {
            RunStatus::Completed => info!("Deployment completed: {}", ctx.endpoint().unwrap_or("no endpoint")),
            RunStatus::CompletedWithWarning => warn!("Deployment completed with warnings: {}", ctx.warnings().join("; ")),
            _ => error!("Deployment aborted"),
        }

        ctx.finish(status);
        emit(
            &self.event_handlers,
            ExecutionEvent::RunFinished {
                run_id: ctx.run_id,
                status,
                endpoint: ctx.endpoint().map(str::to_string),
            },
        );
        status
    }

    fn final_status(&self, plan: &DeploymentPlan, ctx: &RunContext, halted: bool) -> RunStatus {
        if halted || self.cancel.is_cancelled() || ctx.count(StepOutcome::Skipped) > 0 {
            return RunStatus::Aborted;
        }
        let endpoint_missing = plan.exposure_step().is_some() && ctx.endpoint().is_none();
        if endpoint_missing || !ctx.warnings().is_empty() {
            RunStatus::CompletedWithWarning
        } else {
            RunStatus::Completed
        }
    }

    /// Run a batch, concurrently when it has more than one step
    async fn run_batch(
        &self,
        plan: &DeploymentPlan,
        batch: &[String],
        variables: HashMap<String, String>,
    ) -> Vec<StepResult> {
        let steps: Vec<_> = batch.iter().filter_map(|id| plan.step(id)).cloned().collect();

        if let [step] = steps.as_slice() {
            return vec![execute_one(self.executor.clone(), self.event_handlers.clone(), step.clone(), variables).await];
        }

        let variables = Arc::new(variables);
        let mut set = JoinSet::new();
        for step in &steps {
            let executor = self.executor.clone();
            let handlers = self.event_handlers.clone();
            let step = step.clone();
            let variables = variables.clone();
            set.spawn(async move { execute_one(executor, handlers, step, (*variables).clone()).await });
        }

        let mut by_id: HashMap<String, StepResult> = HashMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    by_id.insert(result.step_id.clone(), result);
                }
                Err(e) => error!("Step task terminated unexpectedly: {}", e),
            }
        }

        steps
            .iter()
            .map(|step| {
                by_id.remove(&step.id).unwrap_or_else(|| {
                    StepResult::failed(
                        &step.id,
                        0,
                        chrono::Utc::now(),
                        Duration::ZERO,
                        "step task terminated unexpectedly",
                    )
                })
            })
            .collect()
    }
}

async fn execute_one(
    executor: Arc<StepExecutor>,
    handlers: Arc<Vec<EventHandler>>,
    step: crate::core::Step,
    variables: HashMap<String, String>,
) -> StepResult {
    emit(
        &handlers,
        ExecutionEvent::StepStarted {
            step_id: step.id.clone(),
            name: step.name.clone(),
        },
    );

    let max_attempts = step.retry.as_ref().map(|r| r.max_attempts).unwrap_or(1);
    let on_retry = |attempt: u32, err: &DeployError, delay: Duration| {
        emit(
            &handlers,
            ExecutionEvent::StepRetrying {
                step_id: step.id.clone(),
                attempt,
                max_attempts,
                delay,
                error: err.to_string(),
            },
        );
    };

    executor.execute(&step, &variables, &on_retry).await
}
