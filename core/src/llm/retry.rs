use crate::{PostError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Bounded retry policy shared by the completion and image clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_delay_ms: std::env::var("RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(250),
            max_delay_ms: 2_000,
        }
    }
}

/// Per-call attempt bookkeeping; discarded once the call finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts_made: u32,
    pub max_attempts: u32,
}

impl RetryState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempts_made: 0,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts_made >= self.max_attempts
    }

    /// Count a new attempt; returns false once the budget is spent
    fn begin_attempt(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        self.attempts_made += 1;
        true
    }
}

/// Terminating error of a retried call, with the attempts actually made
#[derive(Debug)]
pub struct RetryFailure {
    pub error: PostError,
    pub state: RetryState,
}

impl From<RetryFailure> for PostError {
    fn from(f: RetryFailure) -> Self {
        f.error
    }
}

impl RetryPolicy {
    /// Retry without sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// Delay to wait after `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the attempt
    /// budget is spent. On exhaustion the last error is returned as-is, together
    /// with the state of the finished loop.
    pub async fn run<T, F, Fut>(
        &self,
        target: &'static str,
        mut op: F,
    ) -> std::result::Result<(T, RetryState), RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut state = RetryState::new(self.max_attempts);
        loop {
            // begin_attempt cannot fail on the first pass since max_attempts >= 1
            state.begin_attempt();
            debug!(target = "retry", component = target, attempt = state.attempts_made, max = state.max_attempts, "Issuing request");

            match op(state.attempts_made).await {
                Ok(value) => return Ok((value, state)),
                Err(err) if !err.is_retryable() => {
                    error!(target = "retry", component = target, error = %err, "Non-retryable failure");
                    return Err(RetryFailure { error: err, state });
                }
                Err(err) if state.is_exhausted() => {
                    error!(
                        target = "retry",
                        component = target,
                        attempts = state.attempts_made,
                        error = %err,
                        "Attempts exhausted"
                    );
                    return Err(RetryFailure { error: err, state });
                }
                Err(err) => {
                    let delay = self.delay_after(state.attempts_made);
                    warn!(
                        target = "retry",
                        component = target,
                        attempt = state.attempts_made,
                        max = state.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed; retrying"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
