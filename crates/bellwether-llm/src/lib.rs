//! Multi-provider LLM orchestration for Bellwether.
//!
//! A uniform provider contract with concrete drivers for OpenAI-compatible
//! chat-completion APIs and a local Ollama endpoint, wrapped in the
//! reliability stack the interview scheduler depends on: retry with
//! server-hint-aware backoff, named circuit breakers, ordered failover with
//! health tracking, a shared token/cost budget, and context trimming.

pub mod breaker;
pub mod budget;
pub mod core;
pub mod fallback;
pub mod ollama;
pub mod openai;
pub mod parse;
pub mod retry;
pub mod trim;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use budget::{BudgetConfig, BudgetStatus, BudgetTracker, PriceTable};
pub use core::{
    ChatMessage, ChatOutcome, CompletionOptions, LlmError, LlmProvider, LlmResult, MessageRole,
    ProviderInfo, ResponseFormat, StreamEvent, TokenUsage, UsageCallback, UsageReport,
};
pub use fallback::{FallbackClient, ProviderHealth};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::{OpenAiCompatConfig, OpenAiCompatProvider};
pub use parse::parse_json;
pub use retry::{RetryPolicy, with_retry};
pub use trim::{HeuristicTokenizer, Tokenizer, trim_messages};
