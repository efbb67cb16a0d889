//! Composition tests for the reliability stack: retry around a breaker
//! around a provider, all inside the fallback chain, with the budget
//! observing every call.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use bellwether_core::ManualClock;
use bellwether_llm::{
    BudgetConfig, BudgetTracker, ChatMessage, ChatOutcome, CircuitBreaker, CircuitBreakerConfig,
    CompletionOptions, FallbackClient, LlmError, LlmProvider, LlmResult, ProviderInfo, RetryPolicy,
    TokenUsage, with_retry,
};

/// Provider that fails a configurable number of times before succeeding.
#[derive(Debug)]
struct FlakyProvider {
    id: String,
    failures_before_success: u32,
    calls: AtomicU32,
}

impl FlakyProvider {
    fn new(id: &str, failures_before_success: u32) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            failures_before_success,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl LlmProvider for FlakyProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.id.clone(),
            supports_json: true,
            supports_streaming: false,
            default_model: "flaky-model".to_string(),
        }
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> LlmResult<ChatOutcome> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            Err(LlmError::ServerError {
                status: 503,
                message: "overloaded".to_string(),
            })
        } else {
            Ok(ChatOutcome {
                text: "recovered".to_string(),
                model: "flaky-model".to_string(),
                usage: TokenUsage::new(100, 40),
                stop_reason: Some("stop".to_string()),
            })
        }
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        initial_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(50),
        jitter: false,
    }
}

#[tokio::test]
async fn retry_recovers_a_flaky_provider() {
    let provider = FlakyProvider::new("flaky", 2);
    let outcome = with_retry("chat", &fast_retry(), |_attempt| {
        let provider = Arc::clone(&provider);
        async move {
            provider
                .chat(&[ChatMessage::user("hi")], &CompletionOptions::default())
                .await
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome.text, "recovered");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn breaker_stops_hammering_a_dead_provider() {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::with_clock(
        "dead-provider",
        CircuitBreakerConfig {
            failure_threshold: 3,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        },
        Arc::new(clock.clone()),
    );
    let provider = FlakyProvider::new("dead", u32::MAX);

    let messages = [ChatMessage::user("hi")];
    let options = CompletionOptions::default();

    // Three real failures open the circuit
    for _ in 0..3 {
        let result = breaker.call(|| provider.chat(&messages, &options)).await;
        assert!(result.is_err());
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    // Further calls fast-fail without reaching the provider
    for _ in 0..5 {
        let err = breaker
            .call(|| provider.chat(&messages, &options))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::CircuitOpen { .. }));
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);

    // After the reset window one probe goes through
    clock.advance(Duration::from_secs(30));
    let _ = breaker.call(|| provider.chat(&messages, &options)).await;
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn fallback_chain_reports_usage_into_the_budget() {
    let budget = Arc::new(BudgetTracker::new(BudgetConfig {
        max_total_tokens: Some(1_000),
        ..Default::default()
    }));

    let broken = FlakyProvider::new("broken", u32::MAX);
    let healthy = FlakyProvider::new("healthy", 0);
    let chain = FallbackClient::new(
        vec![broken.clone() as Arc<dyn LlmProvider>, healthy.clone()],
        Some(budget.usage_callback()),
    )
    .with_retry_policy(RetryPolicy {
        max_attempts: 1,
        ..fast_retry()
    });

    let outcome = chain
        .chat(&[ChatMessage::user("hi")], &CompletionOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.text, "recovered");

    // Only the successful provider's usage landed in the budget
    let status = budget.status();
    assert_eq!(status.input_tokens, 100);
    assert_eq!(status.output_tokens, 40);

    // The failing provider is now marked unhealthy and skipped
    let health = chain.health();
    assert!(!health["broken"].healthy);
    assert!(health["healthy"].healthy);

    chain
        .chat(&[ChatMessage::user("again")], &CompletionOptions::default())
        .await
        .unwrap();
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    assert_eq!(budget.status().input_tokens, 200);
}

#[tokio::test]
async fn budget_admission_blocks_over_cap_work() {
    let budget = BudgetTracker::new(BudgetConfig {
        max_total_tokens: Some(500),
        ..Default::default()
    });
    budget.record_usage("flaky-model", TokenUsage::new(300, 100));

    assert!(!budget.would_exceed(50, 40));
    assert!(budget.would_exceed(80, 40));
}

#[tokio::test]
async fn retry_wraps_exhaustion_with_accounting() {
    let provider = FlakyProvider::new("hopeless", u32::MAX);
    let err = with_retry("chat", &fast_retry(), |_attempt| {
        let provider = Arc::clone(&provider);
        async move {
            provider
                .chat(&[ChatMessage::user("hi")], &CompletionOptions::default())
                .await
        }
    })
    .await
    .unwrap_err();

    match err {
        LlmError::Exhausted { attempts, last, .. } => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, LlmError::ServerError { status: 503, .. }));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
}
