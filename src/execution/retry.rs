//! Retry policy - bounded re-execution of an operation with backoff

use crate::core::error::{DeployError, ErrorClass, ErrorKind};
use crate::execution::cancel::CancelSignal;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential {
        base: Duration,
        max: Duration,
        jitter: bool,
    },
}

impl Backoff {
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Backoff::Exponential {
            base,
            max,
            jitter: false,
        }
    }

    /// Delay before the retry following `retries_used` failed attempts (0-based)
    pub fn delay(&self, retries_used: u32) -> Duration {
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential { base, max, jitter } => {
                let base_ms = base.as_millis();
                if base_ms == 0 {
                    return Duration::ZERO;
                }
                let max_ms = max.as_millis().max(base_ms);
                let shift = retries_used.min(20);
                let backoff_ms = base_ms.saturating_mul(1u128 << shift).min(max_ms);
                let millis = u64::try_from(backoff_ms).unwrap_or(u64::MAX);
                if *jitter && millis > 1 {
                    // Equal jitter: half fixed, half random
                    let half = millis / 2;
                    Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
                } else {
                    Duration::from_millis(millis)
                }
            }
        }
    }
}

/// Decides whether an error is worth retrying
#[derive(Clone, Default)]
pub enum Classifier {
    /// Only `TransientInfra` is transient
    #[default]
    Default,
    /// The listed kinds are transient
    TransientKinds(HashSet<ErrorKind>),
    Custom(Arc<dyn Fn(&DeployError) -> ErrorClass + Send + Sync>),
}

impl Classifier {
    pub fn classify(&self, error: &DeployError) -> ErrorClass {
        // Cancellation is never retried, whatever the classifier says
        if matches!(error, DeployError::Cancelled) {
            return ErrorClass::Fatal;
        }
        match self {
            Classifier::Default => error.default_class(),
            Classifier::TransientKinds(kinds) => {
                if kinds.contains(&error.kind()) {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Fatal
                }
            }
            Classifier::Custom(f) => f(error),
        }
    }
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classifier::Default => write!(f, "Default"),
            Classifier::TransientKinds(kinds) => f.debug_tuple("TransientKinds").field(kinds).finish(),
            Classifier::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// How often and how patiently to retry one operation
#[derive(Debug, Clone)]
pub struct RetrySpec {
    /// Upper bound on attempts, including the first (always at least 1)
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub classifier: Classifier,
}

impl RetrySpec {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            classifier: Classifier::Default,
        }
    }

    /// Run exactly once
    pub fn once() -> Self {
        Self::new(1, Backoff::Fixed(Duration::ZERO))
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Treat the given error kinds as transient instead of the default
    pub fn retry_on<I: IntoIterator<Item = ErrorKind>>(self, kinds: I) -> Self {
        self.with_classifier(Classifier::TransientKinds(kinds.into_iter().collect()))
    }
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self::new(
            3,
            Backoff::Exponential {
                base: Duration::from_secs(2),
                max: Duration::from_secs(30),
                jitter: true,
            },
        )
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("{error}")]
    Fatal { error: DeployError, attempts: u32 },

    #[error("{last_error} (gave up after {attempt_count} attempts)")]
    Exhausted {
        last_error: DeployError,
        attempt_count: u32,
    },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl RetryError {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Fatal { attempts, .. } => *attempts,
            RetryError::Exhausted { attempt_count, .. } => *attempt_count,
            RetryError::Cancelled { attempts } => *attempts,
        }
    }

    pub fn last_error(&self) -> Option<&DeployError> {
        match self {
            RetryError::Fatal { error, .. } => Some(error),
            RetryError::Exhausted { last_error, .. } => Some(last_error),
            RetryError::Cancelled { .. } => None,
        }
    }

    pub fn into_deploy_error(self) -> DeployError {
        match self {
            RetryError::Fatal { error, .. } => error,
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Cancelled { .. } => DeployError::Cancelled,
        }
    }
}

/// Executes operations under a [`RetrySpec`], honouring cancellation
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    cancel: CancelSignal,
}

impl RetryPolicy {
    pub fn new(cancel: CancelSignal) -> Self {
        Self { cancel }
    }

    /// Run `op` until it succeeds, fails fatally or attempts run out
    ///
    /// `op` receives the 1-based attempt number. On success returns the value
    /// and the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, spec: &RetrySpec, op: F) -> Result<(T, u32), RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        self.run_observed(spec, op, |_, _, _| {}).await
    }

    /// Like [`run`](Self::run), calling `observer(attempt, error, delay)` before each wait
    pub async fn run_observed<T, F, Fut, O>(
        &self,
        spec: &RetrySpec,
        mut op: F,
        mut observer: O,
    ) -> Result<(T, u32), RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
        O: FnMut(u32, &DeployError, Duration),
    {
        let max_attempts = spec.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let outcome = tokio::select! {
                result = op(attempt) => result,
                _ = self.cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            };

            let error = match outcome {
                Ok(value) => {
                    debug!(attempt, "operation succeeded");
                    return Ok((value, attempt));
                }
                Err(DeployError::Cancelled) => return Err(RetryError::Cancelled { attempts: attempt }),
                Err(e) => e,
            };

            if spec.classifier.classify(&error) == ErrorClass::Fatal {
                debug!(attempt, error = %error, "fatal error, not retrying");
                return Err(RetryError::Fatal { error, attempts: attempt });
            }

            if attempt >= max_attempts {
                warn!(attempt, error = %error, "retry attempts exhausted");
                return Err(RetryError::Exhausted {
                    last_error: error,
                    attempt_count: attempt,
                });
            }

            let delay = spec.backoff.delay(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "transient error, retrying"
            );
            observer(attempt, &error, delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
            }
        }
    }
}
