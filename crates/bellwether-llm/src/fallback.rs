//! Ordered provider chain with health tracking and automatic failover.
//!
//! Each provider attempt runs through the retry engine and that provider's
//! named circuit breaker; failover moves down the chain only on
//! failover-worthy errors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use bellwether_core::{Clock, SystemClock};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::core::{
    ChatMessage, ChatOutcome, CompletionOptions, LlmError, LlmProvider, LlmResult, ProviderInfo,
    UsageCallback, UsageReport,
};
use crate::retry::{RetryPolicy, with_retry};

/// Health snapshot for one provider in the chain.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    /// Whether the provider is currently considered usable
    pub healthy: bool,
    /// Consecutive failover-worthy failures observed
    pub consecutive_failures: u32,
    /// Message of the last failure
    pub last_error: Option<String>,
    /// When the provider was last attempted
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_error: None,
            last_checked: None,
        }
    }
}

struct HealthEntry {
    health: ProviderHealth,
    last_attempt: Option<Instant>,
}

/// LLM client that fails over across an ordered provider chain.
///
/// Providers marked unhealthy are skipped until the retry delay elapses,
/// at which point a single probe is allowed. Failover only triggers on
/// failover-worthy errors; anything else propagates from the first provider
/// that produced it.
pub struct FallbackClient {
    providers: Vec<Arc<dyn LlmProvider>>,
    health: StdMutex<HashMap<String, HealthEntry>>,
    /// One named breaker per provider, keyed by provider id
    breakers: HashMap<String, CircuitBreaker>,
    retry_policy: RetryPolicy,
    unhealthy_retry_delay: Duration,
    on_usage: Option<UsageCallback>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FallbackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.providers.iter().map(|p| p.info().id).collect();
        f.debug_struct("FallbackClient")
            .field("providers", &ids)
            .finish()
    }
}

impl FallbackClient {
    /// Build a chain over the given providers, in priority order.
    pub fn new(providers: Vec<Arc<dyn LlmProvider>>, on_usage: Option<UsageCallback>) -> Self {
        Self::with_clock(providers, on_usage, Arc::new(SystemClock))
    }

    /// Build a chain with an injected clock (tests).
    pub fn with_clock(
        providers: Vec<Arc<dyn LlmProvider>>,
        on_usage: Option<UsageCallback>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let breakers = providers
            .iter()
            .map(|provider| {
                let id = provider.info().id;
                let breaker = CircuitBreaker::with_clock(
                    id.clone(),
                    CircuitBreakerConfig::default(),
                    Arc::clone(&clock),
                );
                (id, breaker)
            })
            .collect();
        Self {
            providers,
            health: StdMutex::new(HashMap::new()),
            breakers,
            retry_policy: RetryPolicy::default(),
            unhealthy_retry_delay: Duration::from_secs(60),
            on_usage,
            clock,
        }
    }

    /// Override the per-provider retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Override the delay before an unhealthy provider gets a probe.
    #[must_use]
    pub fn with_unhealthy_retry_delay(mut self, delay: Duration) -> Self {
        self.unhealthy_retry_delay = delay;
        self
    }

    /// Current health of every provider in the chain.
    pub fn health(&self) -> HashMap<String, ProviderHealth> {
        self.health
            .lock()
            .expect("health mutex poisoned")
            .iter()
            .map(|(id, entry)| (id.clone(), entry.health.clone()))
            .collect()
    }

    /// Whether the provider should be attempted right now.
    fn should_try(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut health = self.health.lock().expect("health mutex poisoned");
        let entry = health.entry(id.to_string()).or_insert_with(|| HealthEntry {
            health: ProviderHealth::default(),
            last_attempt: None,
        });
        if entry.health.healthy {
            entry.last_attempt = Some(now);
            return true;
        }
        // One probe once the retry delay has elapsed.
        let due = entry
            .last_attempt
            .is_none_or(|last| now.duration_since(last) >= self.unhealthy_retry_delay);
        if due {
            debug!("probing unhealthy provider '{}'", id);
            entry.last_attempt = Some(now);
        }
        due
    }

    fn mark_success(&self, id: &str) {
        let mut health = self.health.lock().expect("health mutex poisoned");
        let entry = health.entry(id.to_string()).or_insert_with(|| HealthEntry {
            health: ProviderHealth::default(),
            last_attempt: None,
        });
        if !entry.health.healthy {
            info!("provider '{}' recovered", id);
        }
        entry.health.healthy = true;
        entry.health.consecutive_failures = 0;
        entry.health.last_error = None;
        entry.health.last_checked = Some(self.clock.system_time());
    }

    fn mark_failure(&self, id: &str, error: &LlmError) {
        let mut health = self.health.lock().expect("health mutex poisoned");
        let entry = health.entry(id.to_string()).or_insert_with(|| HealthEntry {
            health: ProviderHealth::default(),
            last_attempt: None,
        });
        entry.health.healthy = false;
        entry.health.consecutive_failures += 1;
        entry.health.last_error = Some(error.to_string());
        entry.health.last_checked = Some(self.clock.system_time());
    }

    fn report_usage(&self, outcome: &ChatOutcome, provider_id: &str) {
        if let Some(callback) = &self.on_usage {
            callback(&UsageReport {
                provider: provider_id.to_string(),
                model: outcome.model.clone(),
                usage: outcome.usage,
            });
        }
    }
}

#[async_trait]
impl LlmProvider for FallbackClient {
    fn info(&self) -> ProviderInfo {
        let default_model = self
            .providers
            .first()
            .map(|p| p.info().default_model)
            .unwrap_or_default();
        ProviderInfo {
            id: "fallback".to_string(),
            name: format!("Fallback chain ({} providers)", self.providers.len()),
            supports_json: self.providers.iter().all(|p| p.info().supports_json),
            supports_streaming: false,
            default_model,
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<ChatOutcome> {
        let mut last_error: Option<LlmError> = None;

        for provider in &self.providers {
            let id = provider.info().id;
            if !self.should_try(&id) {
                debug!("skipping unhealthy provider '{}'", id);
                continue;
            }
            let breaker = self.breakers.get(&id).expect("breaker per provider");
            if breaker.would_reject() {
                debug!("breaker '{}' open, skipping provider", id);
                last_error = Some(LlmError::CircuitOpen { breaker: id });
                continue;
            }

            let attempt = with_retry(&id, &self.retry_policy, |_attempt| {
                breaker.call(|| provider.chat(messages, options))
            })
            .await;

            match attempt {
                Ok(outcome) => {
                    self.mark_success(&id);
                    self.report_usage(&outcome, &id);
                    return Ok(outcome);
                }
                Err(error) if error.is_failover_worthy() => {
                    warn!("provider '{}' failed ({}), trying next", id, error);
                    self.mark_failure(&id, &error);
                    last_error = Some(error);
                }
                Err(error) => {
                    // Not failover-worthy: the next provider would fail the
                    // same way. Propagate immediately.
                    return Err(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::InvalidRequest {
            message: "no providers available".to_string(),
        }))
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> LlmResult<ChatOutcome> {
        // Providers default `complete` to a single-user-message chat, so the
        // chain can reuse the chat failover path wholesale.
        self.chat(&[ChatMessage::user(prompt)], options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TokenUsage;
    use bellwether_core::ManualClock;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted provider: fails `failures_before_success` times, then
    /// succeeds, counting every call.
    #[derive(Debug)]
    struct ScriptedProvider {
        id: String,
        calls: AtomicU32,
        error: Option<LlmError>,
    }

    impl ScriptedProvider {
        fn failing(id: &str, error: LlmError) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                calls: AtomicU32::new(0),
                error: Some(error),
            })
        }

        fn healthy(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                calls: AtomicU32::new(0),
                error: None,
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                id: self.id.clone(),
                name: self.id.clone(),
                supports_json: true,
                supports_streaming: false,
                default_model: "test-model".to_string(),
            }
        }

        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &CompletionOptions,
        ) -> LlmResult<ChatOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(error) => Err(error.clone()),
                None => Ok(ChatOutcome {
                    text: format!("from {}", self.id),
                    model: "test-model".to_string(),
                    usage: TokenUsage::new(10, 5),
                    stop_reason: Some("stop".to_string()),
                }),
            }
        }
    }

    fn options() -> CompletionOptions {
        CompletionOptions::default()
    }

    /// Keep tests fast and call counts predictable: one attempt, no sleeps.
    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(1),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_first_provider_wins_when_healthy() {
        let first = ScriptedProvider::healthy("first");
        let second = ScriptedProvider::healthy("second");
        let client = FallbackClient::new(vec![first.clone(), second.clone()], None);

        let outcome = client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(outcome.text, "from first");
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn test_retries_within_provider_before_failover() {
        let first = ScriptedProvider::failing(
            "first",
            LlmError::ServerError {
                status: 500,
                message: "down".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 1.0,
            max_delay: Duration::from_millis(2),
            jitter: false,
        };
        let client =
            FallbackClient::new(vec![first.clone(), second.clone()], None).with_retry_policy(policy);

        let outcome = client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(outcome.text, "from second");
        // Provider i is retried to exhaustion, then provider i+1 is tried
        assert_eq!(first.call_count(), 3);
        assert_eq!(second.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failover_on_worthy_error() {
        let first = ScriptedProvider::failing(
            "first",
            LlmError::ServerError {
                status: 500,
                message: "down".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let client = FallbackClient::new(vec![first.clone(), second.clone()], None)
            .with_retry_policy(no_retry());

        let outcome = client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(outcome.text, "from second");
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 1);

        let health = client.health();
        assert!(!health["first"].healthy);
        assert_eq!(health["first"].consecutive_failures, 1);
        assert!(health["second"].healthy);
    }

    #[tokio::test]
    async fn test_auth_error_fails_over_without_retry() {
        let first = ScriptedProvider::failing(
            "first",
            LlmError::Auth {
                message: "401".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let client = FallbackClient::new(vec![first.clone(), second.clone()], None);

        let outcome = client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(outcome.text, "from second");
        // Terminal errors skip the retry loop entirely
        assert_eq!(first.call_count(), 1);
    }

    #[tokio::test]
    async fn test_non_failover_error_propagates() {
        let first = ScriptedProvider::failing(
            "first",
            LlmError::Refusal {
                message: "declined".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let client = FallbackClient::new(vec![first.clone(), second.clone()], None);

        let err = client
            .chat(&[ChatMessage::user("hi")], &options())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Refusal { .. }));
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn test_all_providers_failing_returns_last_error() {
        let first = ScriptedProvider::failing(
            "first",
            LlmError::ServerError {
                status: 500,
                message: "a".into(),
            },
        );
        let second = ScriptedProvider::failing(
            "second",
            LlmError::Connection {
                message: "b".into(),
            },
        );
        let client = FallbackClient::new(vec![first, second], None).with_retry_policy(no_retry());

        let err = client
            .chat(&[ChatMessage::user("hi")], &options())
            .await
            .unwrap_err();
        // The wrapped final error comes from the last provider in the chain
        match err {
            LlmError::Exhausted { last, .. } => {
                assert!(matches!(*last, LlmError::Connection { .. }));
            }
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider() {
        let clock = ManualClock::new();
        let first = ScriptedProvider::failing(
            "first",
            LlmError::ServerError {
                status: 500,
                message: "down".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let client = FallbackClient::with_clock(
            vec![first.clone(), second.clone()],
            None,
            Arc::new(clock.clone()),
        )
        .with_retry_policy(no_retry())
        // Health tracking would normally shield the provider first; a
        // zero delay lets every call reach the breaker
        .with_unhealthy_retry_delay(Duration::ZERO);

        // Default breaker threshold is five consecutive failures
        for _ in 0..5 {
            client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        }
        assert_eq!(first.call_count(), 5);

        // Breaker open: the provider is skipped without being called
        client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(first.call_count(), 5);

        // After the reset timeout the breaker admits a probe again
        clock.advance(Duration::from_secs(31));
        client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(first.call_count(), 6);
    }

    #[tokio::test]
    async fn test_unhealthy_provider_skipped_until_delay() {
        let clock = ManualClock::new();
        let first = ScriptedProvider::failing(
            "first",
            LlmError::ServerError {
                status: 503,
                message: "down".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let client = FallbackClient::with_clock(
            vec![first.clone(), second.clone()],
            None,
            Arc::new(clock.clone()),
        )
        .with_retry_policy(no_retry())
        .with_unhealthy_retry_delay(Duration::from_secs(60));

        // First call marks 'first' unhealthy
        client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(first.call_count(), 1);

        // Within the delay: 'first' skipped entirely
        client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(first.call_count(), 1);

        // After the delay: one probe allowed
        clock.advance(Duration::from_secs(61));
        client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        assert_eq!(first.call_count(), 2);
    }

    #[tokio::test]
    async fn test_usage_callback_fans_in() {
        let reports: Arc<StdMutex<Vec<UsageReport>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let callback: UsageCallback = Arc::new(move |report| {
            sink.lock().unwrap().push(report.clone());
        });

        let first = ScriptedProvider::failing(
            "first",
            LlmError::ServerError {
                status: 500,
                message: "down".into(),
            },
        );
        let second = ScriptedProvider::healthy("second");
        let client =
            FallbackClient::new(vec![first, second], Some(callback)).with_retry_policy(no_retry());

        client.chat(&[ChatMessage::user("hi")], &options()).await.unwrap();
        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].provider, "second");
        assert_eq!(reports[0].usage.total(), 15);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let client = FallbackClient::new(vec![], None);
        let err = client
            .chat(&[ChatMessage::user("hi")], &options())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest { .. }));
    }
}
