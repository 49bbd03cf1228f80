//! Readiness gate - polls a condition until it holds or its deadline passes

use crate::core::condition::{Condition, ConditionCheck, Observation};
use crate::core::error::DeployError;
use crate::execution::cancel::CancelSignal;
use crate::platform::Probe;
use std::time::Duration;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

/// How a gate wait ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Ready {
        observation: Observation,
        polls: u32,
        elapsed: Duration,
    },
    TimedOut {
        /// Last non-ready observation, kept for diagnostics
        last: Option<Observation>,
        polls: u32,
        elapsed: Duration,
    },
    Cancelled {
        polls: u32,
    },
}

impl GateOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, GateOutcome::Ready { .. })
    }

    pub fn polls(&self) -> u32 {
        match self {
            GateOutcome::Ready { polls, .. }
            | GateOutcome::TimedOut { polls, .. }
            | GateOutcome::Cancelled { polls } => *polls,
        }
    }

    /// Description of the last observed state
    pub fn last_observed(&self) -> String {
        match self {
            GateOutcome::Ready { observation, .. } => observation.detail.clone(),
            GateOutcome::TimedOut { last: Some(obs), .. } => obs.detail.clone(),
            GateOutcome::TimedOut { last: None, .. } => "no observation completed".to_string(),
            GateOutcome::Cancelled { .. } => "cancelled".to_string(),
        }
    }
}

/// Blocks progression until a condition is observed to hold
#[derive(Debug, Clone, Default)]
pub struct ReadinessGate {
    cancel: CancelSignal,
}

impl ReadinessGate {
    pub fn new(cancel: CancelSignal) -> Self {
        Self { cancel }
    }

    /// Poll `condition` through `probe` until ready, timed out or cancelled
    ///
    /// The first evaluation happens immediately. Probe errors count as a
    /// not-ready observation. Returns no later than `deadline + poll_interval`
    /// after the call, even if a probe hangs.
    pub async fn wait_until(&self, condition: &Condition, probe: &dyn Probe) -> GateOutcome {
        let start = Instant::now();
        // A deadline past what `Instant` can represent means no deadline
        let soft_deadline = start.checked_add(condition.deadline);
        let hard_deadline = soft_deadline.and_then(|d| d.checked_add(condition.poll_interval));
        let mut polls = 0;
        let mut last: Option<Observation> = None;

        info!("Waiting for {} (deadline {}s)", condition, condition.deadline.as_secs());

        loop {
            if self.cancel.is_cancelled() {
                return GateOutcome::Cancelled { polls };
            }

            polls += 1;
            let evaluation = tokio::select! {
                result = evaluate_before(hard_deadline, probe, &condition.check) => result,
                _ = self.cancel.cancelled() => return GateOutcome::Cancelled { polls },
            };

            let observation = match evaluation {
                Some(Ok(obs)) => obs,
                Some(Err(e)) => Observation::pending(e.to_string()),
                None => {
                    warn!("Evaluation of {} did not return before the deadline", condition);
                    return GateOutcome::TimedOut {
                        last,
                        polls,
                        elapsed: start.elapsed(),
                    };
                }
            };

            if observation.ready {
                info!("{} satisfied after {} poll(s): {}", condition, polls, observation.detail);
                return GateOutcome::Ready {
                    observation,
                    polls,
                    elapsed: start.elapsed(),
                };
            }

            debug!("{} not ready (poll {}): {}", condition, polls, observation.detail);
            last = Some(observation);

            let now = Instant::now();
            if soft_deadline.is_some_and(|d| now >= d) {
                warn!(
                    "Timed out waiting for {} after {} poll(s): {}",
                    condition,
                    polls,
                    last.as_ref().map(|o| o.detail.as_str()).unwrap_or_default()
                );
                return GateOutcome::TimedOut {
                    last,
                    polls,
                    elapsed: start.elapsed(),
                };
            }

            let pause = match soft_deadline {
                Some(d) => condition.poll_interval.min(d - now),
                None => condition.poll_interval,
            };
            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.cancel.cancelled() => return GateOutcome::Cancelled { polls },
            }
        }
    }
}

/// One probe evaluation; `None` when it did not return before `deadline`
async fn evaluate_before(
    deadline: Option<Instant>,
    probe: &dyn Probe,
    check: &ConditionCheck,
) -> Option<Result<Observation, DeployError>> {
    match deadline {
        Some(deadline) => timeout_at(deadline, probe.evaluate(check)).await.ok(),
        None => Some(probe.evaluate(check).await),
    }
}
