//! Named circuit breakers.
//!
//! A breaker counts consecutive failures inside a sliding window. Crossing
//! the threshold opens the circuit: calls fast-fail with a retryable
//! "circuit open" error until the reset timeout elapses, at which point one
//! probe is admitted (half-open). A successful probe closes the circuit; a
//! failed one reopens it.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use bellwether_core::{Clock, SystemClock};

use crate::core::{LlmError, LlmResult};

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Window within which failures count as consecutive
    pub failure_window: Duration,
    /// Time the circuit stays open before admitting a probe
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
enum BreakerState {
    Closed {
        consecutive_failures: u32,
        first_failure: Option<Instant>,
    },
    Open {
        opened_at: Instant,
    },
    HalfOpen {
        probe_in_flight: bool,
    },
}

/// A named circuit breaker guarding one dependency.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    state: StdMutex<BreakerState>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker with the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker with an injected clock (tests).
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: StdMutex::new(BreakerState::Closed {
                consecutive_failures: 0,
                first_failure: None,
            }),
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admission check. `Ok` admits the call; `Err` fast-fails it.
    ///
    /// An open circuit whose reset timeout elapsed transitions to half-open
    /// and admits exactly one probe.
    pub fn check(&self) -> LlmResult<()> {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match &mut *state {
            BreakerState::Closed { .. } => Ok(()),
            BreakerState::Open { opened_at } => {
                if self.clock.now().duration_since(*opened_at) >= self.config.reset_timeout {
                    debug!("breaker '{}' half-open, admitting probe", self.name);
                    *state = BreakerState::HalfOpen {
                        probe_in_flight: true,
                    };
                    Ok(())
                } else {
                    Err(LlmError::CircuitOpen {
                        breaker: self.name.clone(),
                    })
                }
            }
            BreakerState::HalfOpen { probe_in_flight } => {
                if *probe_in_flight {
                    Err(LlmError::CircuitOpen {
                        breaker: self.name.clone(),
                    })
                } else {
                    *probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match &*state {
            BreakerState::HalfOpen { .. } => {
                debug!("breaker '{}' closed after successful probe", self.name);
                *state = BreakerState::Closed {
                    consecutive_failures: 0,
                    first_failure: None,
                };
            }
            BreakerState::Closed { .. } => {
                *state = BreakerState::Closed {
                    consecutive_failures: 0,
                    first_failure: None,
                };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().expect("breaker mutex poisoned");
        match &mut *state {
            BreakerState::Closed {
                consecutive_failures,
                first_failure,
            } => {
                // Failures outside the window restart the count.
                match first_failure {
                    Some(first)
                        if now.duration_since(*first) > self.config.failure_window =>
                    {
                        *consecutive_failures = 1;
                        *first_failure = Some(now);
                    }
                    Some(_) => *consecutive_failures += 1,
                    None => {
                        *consecutive_failures = 1;
                        *first_failure = Some(now);
                    }
                }
                if *consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "breaker '{}' opened after {} consecutive failures",
                        self.name, consecutive_failures
                    );
                    *state = BreakerState::Open { opened_at: now };
                }
            }
            BreakerState::HalfOpen { .. } => {
                warn!("breaker '{}' reopened after failed probe", self.name);
                *state = BreakerState::Open { opened_at: now };
            }
            BreakerState::Open { .. } => {}
        }
    }

    /// True while the circuit rejects calls outright.
    pub fn is_open(&self) -> bool {
        matches!(
            &*self.state.lock().expect("breaker mutex poisoned"),
            BreakerState::Open { .. }
        )
    }

    /// Non-mutating admission preview: would [`CircuitBreaker::check`]
    /// reject a call right now? Unlike `check`, this never transitions to
    /// half-open or claims the probe slot.
    pub fn would_reject(&self) -> bool {
        match &*self.state.lock().expect("breaker mutex poisoned") {
            BreakerState::Closed { .. } => false,
            BreakerState::Open { opened_at } => {
                self.clock.now().duration_since(*opened_at) < self.config.reset_timeout
            }
            BreakerState::HalfOpen { probe_in_flight } => *probe_in_flight,
        }
    }

    /// Run an operation through the breaker, recording its outcome.
    pub async fn call<T, F, Fut>(&self, op: F) -> LlmResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LlmResult<T>>,
    {
        self.check()?;
        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bellwether_core::ManualClock;
    use pretty_assertions::assert_eq;

    fn breaker_with_clock() -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 3,
                failure_window: Duration::from_secs(60),
                reset_timeout: Duration::from_secs(30),
            },
            Arc::new(clock.clone()),
        );
        (breaker, clock)
    }

    #[test]
    fn test_opens_after_exact_threshold() {
        let (breaker, _clock) = breaker_with_clock();

        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        assert!(breaker.check().is_ok());

        breaker.record_failure();
        assert!(breaker.is_open());
        assert!(matches!(
            breaker.check(),
            Err(LlmError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let (breaker, _clock) = breaker_with_clock();

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_failures_outside_window_restart_count() {
        let (breaker, clock) = breaker_with_clock();

        breaker.record_failure();
        breaker.record_failure();
        // Let the window lapse; the next failure starts a new streak.
        clock.advance(Duration::from_secs(120));
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_half_open_after_reset_timeout() {
        let (breaker, clock) = breaker_with_clock();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(matches!(breaker.check(), Err(LlmError::CircuitOpen { .. })));

        clock.advance(Duration::from_secs(29));
        assert!(matches!(breaker.check(), Err(LlmError::CircuitOpen { .. })));

        clock.advance(Duration::from_secs(1));
        // Reset elapsed: exactly one probe admitted
        assert!(breaker.check().is_ok());
        assert!(matches!(breaker.check(), Err(LlmError::CircuitOpen { .. })));
    }

    #[test]
    fn test_probe_success_closes() {
        let (breaker, clock) = breaker_with_clock();
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        assert!(breaker.check().is_ok());
        breaker.record_success();

        assert!(!breaker.is_open());
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let (breaker, clock) = breaker_with_clock();
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance(Duration::from_secs(30));
        assert!(breaker.check().is_ok());
        breaker.record_failure();

        assert!(breaker.is_open());
        assert!(matches!(breaker.check(), Err(LlmError::CircuitOpen { .. })));

        // And the new open period requires a fresh reset timeout
        clock.advance(Duration::from_secs(30));
        assert!(breaker.check().is_ok());
    }

    #[tokio::test]
    async fn test_call_wrapper_records_outcomes() {
        let (breaker, _clock) = breaker_with_clock();

        for _ in 0..3 {
            let _ = breaker
                .call(|| async {
                    Err::<(), _>(LlmError::ServerError {
                        status: 500,
                        message: "down".into(),
                    })
                })
                .await;
        }
        assert!(breaker.is_open());

        let err = breaker.call(|| async { Ok(()) }).await.unwrap_err();
        assert!(matches!(err, LlmError::CircuitOpen { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_would_reject_is_side_effect_free() {
        let (breaker, clock) = breaker_with_clock();
        assert!(!breaker.would_reject());

        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(breaker.would_reject());

        clock.advance(Duration::from_secs(30));
        // Reset elapsed: a probe is available, and previewing does not
        // consume it
        assert!(!breaker.would_reject());
        assert!(!breaker.would_reject());
        assert!(breaker.check().is_ok());
        // Probe claimed; further calls would be rejected
        assert!(breaker.would_reject());
    }

    #[test]
    fn test_circuit_open_error_names_breaker() {
        let (breaker, _clock) = breaker_with_clock();
        for _ in 0..3 {
            breaker.record_failure();
        }
        match breaker.check() {
            Err(LlmError::CircuitOpen { breaker: name }) => assert_eq!(name, "test"),
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }
}
