//! Retry engine with exponential backoff and server-hint-aware delays.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::core::{LlmError, LlmResult};

/// Backoff policy for [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Exponential multiplier per attempt
    pub multiplier: f64,
    /// Upper bound on any computed delay
    pub max_delay: Duration,
    /// Apply ±25% jitter to the exponential component
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (0-based).
    ///
    /// A server-provided hint floors the delay; the cap applies last, so
    /// the result always lies within `[min(hint, max_delay), max_delay]`.
    pub fn delay_for(&self, attempt: u32, server_hint_ms: Option<u64>) -> Duration {
        let exponential =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let mut delay_ms = exponential.min(self.max_delay.as_millis() as f64);

        if self.jitter {
            let factor = rand::rng().random_range(0.75..=1.25);
            delay_ms *= factor;
        }

        if let Some(hint) = server_hint_ms {
            delay_ms = delay_ms.max(hint as f64);
        }

        let capped = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Execute `op` with retries.
///
/// The operation runs at most `max_attempts` times. Terminal errors
/// propagate immediately; retryable errors sleep per the policy (honoring a
/// server `retry-after` hint when present) and try again. When attempts are
/// exhausted the last error is wrapped with attempt count and duration.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> LlmResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = LlmResult<T>>,
{
    let started = tokio::time::Instant::now();
    let mut last_error: Option<LlmError> = None;

    for attempt in 0..policy.max_attempts {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded on attempt {}", operation, attempt + 1);
                }
                return Ok(value);
            }
            Err(error) => {
                if !error.is_retryable() {
                    debug!("{} failed terminally: {}", operation, error);
                    return Err(error);
                }
                if attempt + 1 >= policy.max_attempts {
                    last_error = Some(error);
                    break;
                }
                let delay = policy.delay_for(attempt, error.retry_after_ms());
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation,
                    attempt + 1,
                    policy.max_attempts,
                    delay,
                    error
                );
                last_error = Some(error);
                tokio::time::sleep(delay).await;
            }
        }
    }

    let last = last_error.unwrap_or(LlmError::Cancelled);
    Err(LlmError::Exhausted {
        attempts: policy.max_attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
        last: Box::new(last),
    })
}
