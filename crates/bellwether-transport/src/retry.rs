//! Reconnect policy for stream-based transports.

use rand::Rng;
use std::time::Duration;

/// Retry policy for auto-reconnect of the long-lived SSE stream.
#[derive(Clone, Debug)]
pub enum RetryPolicy {
    /// Fixed interval between retries
    Fixed {
        /// Time interval between retry attempts
        interval: Duration,
        /// Maximum number of retry attempts (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Exponential backoff with ±25% jitter
    Exponential {
        /// Base delay for the backoff calculation
        base: Duration,
        /// Maximum delay between retry attempts
        max_delay: Duration,
        /// Maximum number of retry attempts (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Never retry
    Never,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt, or `None` when attempts are exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed {
                interval,
                max_attempts,
            } => {
                if let Some(max) = max_attempts
                    && attempt >= *max
                {
                    return None;
                }
                Some(*interval)
            }
            Self::Exponential {
                base,
                max_delay,
                max_attempts,
            } => {
                if let Some(max) = max_attempts
                    && attempt >= *max
                {
                    return None;
                }
                let base_ms = base.as_millis() as u64;
                let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt));
                let capped = exp.min(max_delay.as_millis() as u64);
                let jitter_range = capped / 4;
                let jittered = if jitter_range > 0 {
                    let offset = rand::rng().random_range(0..=jitter_range * 2);
                    capped.saturating_sub(jitter_range).saturating_add(offset)
                } else {
                    capped
                };
                Some(Duration::from_millis(jittered))
            }
            Self::Never => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_policy() {
        let policy = RetryPolicy::Fixed {
            interval: Duration::from_secs(5),
            max_attempts: Some(3),
        };
        assert_eq!(policy.delay(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay(3), None);
    }

    #[test]
    fn test_exponential_bounds() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: None,
        };
        // Expected base delays 1s, 2s, 4s... with ±25% jitter
        let d0 = policy.delay(0).unwrap();
        assert!(d0 >= Duration::from_millis(750) && d0 <= Duration::from_millis(1250));

        let d2 = policy.delay(2).unwrap();
        assert!(d2 >= Duration::from_millis(3000) && d2 <= Duration::from_millis(5000));

        // Far attempts are capped at max_delay (with jitter headroom)
        let d20 = policy.delay(20).unwrap();
        assert!(d20 >= Duration::from_millis(45_000) && d20 <= Duration::from_millis(75_000));
    }

    #[test]
    fn test_exponential_exhaustion() {
        let policy = RetryPolicy::Exponential {
            base: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            max_attempts: Some(2),
        };
        assert!(policy.delay(0).is_some());
        assert!(policy.delay(1).is_some());
        assert!(policy.delay(2).is_none());
    }

    #[test]
    fn test_never() {
        assert_eq!(RetryPolicy::Never.delay(0), None);
    }
}
