// Retry Executor - bounded attempts with exponential backoff between them
use crate::application::invoker::{InvocationError, ModuleInvoker};
use crate::application::worker::constants::DEFAULT_MAX_ATTEMPTS;
use crate::domain::{JobPayload, ModuleDescriptor};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Exponential backoff: `multiplier * 2^(attempt - 1)` seconds, clamped to `[min_wait, max_wait]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub multiplier: f64,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn new(multiplier: f64, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            multiplier: multiplier.max(0.0),
            min_wait,
            max_wait: max_wait.max(min_wait),
        }
    }

    /// Wait after failed attempt number `attempt` (1-based)
    pub fn wait_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.multiplier * 2f64.powi(exponent);
        let clamped = raw.clamp(self.min_wait.as_secs_f64(), self.max_wait.as_secs_f64());
        Duration::from_secs_f64(clamped)
    }
}

/// Attempt budget plus the waits between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Final failure of a retried call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetryError {
    #[error("Failed after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: InvocationError },

    #[error("{0}")]
    Fatal(InvocationError),
}

impl RetryError {
    pub fn last_error(&self) -> &InvocationError {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Fatal(e) => e,
        }
    }
}

/// What `execute_with_retry` observed
#[derive(Debug)]
pub struct RetryOutcome {
    /// Invocations made (at least 1)
    pub attempts: u32,
    /// Timed-out blocking calls left running on their threads
    pub orphaned_calls: u32,
    pub result: Result<Value, RetryError>,
}

impl RetryOutcome {
    /// Retries beyond the first attempt
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Wraps module invocation with the retry policy
#[derive(Clone)]
pub struct RetryExecutor {
    invoker: Arc<ModuleInvoker>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(invoker: Arc<ModuleInvoker>, policy: RetryPolicy) -> Self {
        Self { invoker, policy }
    }

    pub fn invoker(&self) -> &Arc<ModuleInvoker> {
        &self.invoker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Same invoker and backoff with a different attempt budget
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            policy: RetryPolicy {
                max_attempts,
                ..self.policy
            },
        }
    }

    /// Invoke up to `max_attempts` times, each bounded by `timeout`.
    ///
    /// Stops at the first success or at a non-retryable error. The wait after
    /// failed attempt `k` is `backoff.wait_for(k)`; there is no wait after the last.
    pub async fn execute_with_retry(
        &self,
        descriptor: &ModuleDescriptor,
        payload: &JobPayload,
        timeout: Duration,
    ) -> RetryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut orphaned_calls = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.invoker.invoke(descriptor, payload, timeout).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(module = %descriptor.key, attempt, "Module succeeded after retry");
                    }
                    return RetryOutcome {
                        attempts: attempt,
                        orphaned_calls,
                        result: Ok(value),
                    };
                }
                Err(e) => e,
            };

            if err.is_orphaned() {
                orphaned_calls += 1;
            }

            if !err.is_retryable() {
                return RetryOutcome {
                    attempts: attempt,
                    orphaned_calls,
                    result: Err(RetryError::Fatal(err)),
                };
            }

            if attempt >= max_attempts {
                warn!(
                    module = %descriptor.key,
                    attempts = attempt,
                    error = %err,
                    "Max retry attempts reached"
                );
                return RetryOutcome {
                    attempts: attempt,
                    orphaned_calls,
                    result: Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    }),
                };
            }

            let delay = self.policy.backoff.wait_for(attempt);
            warn!(
                module = %descriptor.key,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Module attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
