//! Retry with exponential backoff and jitter.
//!
//! The caller supplies a classification function that turns each error into a
//! [`RetryDecision`]; the executor never retries an error classified as
//! [`RetryDecision::Stop`] and always surfaces the last error once attempts
//! are exhausted.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff policy shared by the generation and delivery stages.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of each delay (0.0 to 1.0) that may be randomly shaved off.
    pub jitter: f64,
    /// Multiplier applied to the delay for [`RetryDecision::RetrySlow`].
    pub slow_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: 0.2,
            slow_multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            slow_multiplier: 1,
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), without jitter:
    /// `base * 2^(attempt-1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Delay to wait after failed attempt `attempt` given the classifier's decision.
    /// Returns `None` for [`RetryDecision::Stop`].
    pub fn delay_for(&self, attempt: u32, decision: RetryDecision) -> Option<Duration> {
        let slow_cap = self.max_delay.saturating_mul(self.slow_multiplier.max(1));
        let delay = match decision {
            RetryDecision::Stop => return None,
            RetryDecision::Retry => self.apply_jitter(self.backoff(attempt)),
            RetryDecision::RetrySlow => self.apply_jitter(
                self.backoff(attempt)
                    .saturating_mul(self.slow_multiplier.max(1))
                    .min(slow_cap),
            ),
            // Service hints are honoured as a floor, never shortened by jitter.
            RetryDecision::RetryAfter(hint) => hint.max(self.backoff(attempt)).min(slow_cap),
        };
        Some(delay)
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 - rand::thread_rng().gen_range(0.0..=jitter);
        delay.mul_f64(factor)
    }
}

/// What the classifier says about one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry with the normal backoff.
    Retry,
    /// Retry with a longer backoff (quota-type errors).
    RetrySlow,
    /// Retry after at least the given delay.
    RetryAfter(Duration),
    /// Terminal error, do not retry.
    Stop,
}

/// Failure of a retried operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The classifier marked the error terminal.
    Terminal { error: E, attempts: u32 },
    /// Every attempt failed with a retryable error.
    Exhausted { last_error: E, attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Terminal { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::Terminal { error, .. } => error,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Terminal { error, .. } => error,
            RetryError::Exhausted { last_error, .. } => last_error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Terminal { error, .. } => write!(f, "{}", error),
            RetryError::Exhausted {
                last_error,
                attempts,
            } => write!(f, "failed after {} attempts: {}", attempts, last_error),
        }
    }
}

impl<E: std::fmt::Debug + Display> std::error::Error for RetryError<E> {}

/// Runs an async operation under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `operation` with the 1-based attempt number until it succeeds, the
    /// classifier returns [`RetryDecision::Stop`], or attempts run out.
    pub async fn execute<T, E, F, Fut, C>(
        &self,
        label: &str,
        mut operation: F,
        classify: C,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Fn(&E) -> RetryDecision,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let decision = classify(&error);
            let delay = match self.policy.delay_for(attempt, decision) {
                None => {
                    log::debug!("{} failed with terminal error: {}", label, error);
                    return Err(RetryError::Terminal {
                        error,
                        attempts: attempt,
                    });
                }
                Some(delay) => delay,
            };

            if attempt >= max_attempts {
                log::warn!(
                    "{} failed after {} attempts: {}",
                    label,
                    attempt,
                    error
                );
                return Err(RetryError::Exhausted {
                    last_error: error,
                    attempts: attempt,
                });
            }

            log::warn!(
                "{} failed with retryable error (attempt {}/{}), retrying in {}ms: {}",
                label,
                attempt,
                max_attempts,
                delay.as_millis(),
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
