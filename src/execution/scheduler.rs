//! Execution scheduler - determines which steps to run next

use crate::core::DeploymentPlan;
use std::collections::HashSet;
use std::str::FromStr;

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    #[default]
    Sequential,

    /// Execute all ready steps in parallel
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    /// `sequential`, `parallel` or `parallel:N`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(SchedulingStrategy::Sequential),
            "parallel" => Ok(SchedulingStrategy::Parallel),
            other => match other.strip_prefix("parallel:").map(str::parse::<usize>) {
                Some(Ok(n)) if n > 0 => Ok(SchedulingStrategy::LimitedParallel(n)),
                _ => Err(format!(
                    "invalid strategy '{}': expected sequential, parallel or parallel:N",
                    other
                )),
            },
        }
    }
}

/// Scheduler for determining which steps to run
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of steps to execute
    ///
    /// A step is ready when it has not finished and every prerequisite is in
    /// `succeeded`. Batches are returned in execution order.
    pub fn next_steps(
        &self,
        plan: &DeploymentPlan,
        succeeded: &HashSet<String>,
        finished: &HashSet<String>,
    ) -> Vec<String> {
        let mut ready = plan
            .ordered_steps()
            .filter(|s| !finished.contains(&s.id) && s.dependencies_met(succeeded))
            .map(|s| s.id.clone());

        match self.strategy {
            SchedulingStrategy::Sequential => ready.next().into_iter().collect(),
            SchedulingStrategy::Parallel => ready.collect(),
            SchedulingStrategy::LimitedParallel(max) => ready.take(max.max(1)).collect(),
        }
    }
}
