//! OpenAI-compatible chat-completions driver.
//!
//! Covers hosted OpenAI-style APIs and compatible endpoints (DeepSeek,
//! OpenRouter, vLLM gateways) via a configurable base URL. Provider quirks
//! stay inside this module: reasoning-model parameter renames, strict
//! role-alternation normalization, and refusal detection against a
//! configurable pattern table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use bellwether_core::sse::SseDecoder;

use crate::core::{
    ChatMessage, ChatOutcome, CompletionOptions, LlmError, LlmProvider, LlmResult, MessageRole,
    ProviderInfo, ResponseFormat, StreamEvent, TokenUsage, UsageCallback, UsageReport,
};
use crate::trim::{HeuristicTokenizer, trim_messages};

/// Default refusal prefixes; loaded at startup so deployments can extend
/// them without a rebuild.
pub fn default_refusal_patterns() -> Vec<String> {
    [
        "i can't",
        "i cannot",
        "i'm unable",
        "i am unable",
        "i'm sorry, but",
        "i am sorry, but",
        "i won't",
        "as an ai",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    /// Stable provider id used in health tracking and usage reports
    pub id: String,
    /// API key sent as a Bearer token
    pub api_key: String,
    /// Base URL up to `/v1`
    pub base_url: String,
    /// Model used when options carry none
    pub default_model: String,
    /// Request timeout
    pub timeout: Duration,
    /// Additional headers
    pub headers: HashMap<String, String>,
    /// Merge consecutive same-role messages for providers that require
    /// strict user/assistant alternation
    pub strict_role_alternation: bool,
    /// Trim conversations above this token budget before sending
    pub context_budget_tokens: Option<usize>,
    /// Refusal-detection prefixes (lowercase)
    pub refusal_patterns: Vec<String>,
    /// Callback invoked with usage after every successful call
    pub on_usage: Option<UsageCallback>,
}

impl std::fmt::Debug for OpenAiCompatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatConfig")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl Default for OpenAiCompatConfig {
    fn default() -> Self {
        Self {
            id: "openai".to_string(),
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(60),
            headers: HashMap::new(),
            strict_role_alternation: false,
            context_budget_tokens: None,
            refusal_patterns: default_refusal_patterns(),
            on_usage: None,
        }
    }
}

/// OpenAI-compatible provider.
pub struct OpenAiCompatProvider {
    config: OpenAiCompatConfig,
    client: HttpClient,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("id", &self.config.id)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a provider. The API key must be non-empty.
    pub fn new(config: OpenAiCompatConfig) -> LlmResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::InvalidRequest {
                message: format!("provider '{}': API key is empty", config.id),
            });
        }
        let client = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest {
                message: format!("http client build: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn resolve_model<'a>(&'a self, options: &'a CompletionOptions) -> &'a str {
        options.model.as_deref().unwrap_or(&self.config.default_model)
    }

    /// Reasoning-mode models take `max_completion_tokens` and reject
    /// sampling parameters.
    fn is_reasoning_model(model: &str) -> bool {
        model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
            || model.contains("reasoner")
    }

    fn build_wire_messages(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Vec<WireMessage> {
        let trimmed;
        let messages = match self.config.context_budget_tokens {
            Some(budget) => {
                trimmed = trim_messages(messages, budget, 1, &HeuristicTokenizer);
                trimmed.as_slice()
            }
            None => messages,
        };

        let mut wire: Vec<WireMessage> = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &options.system_prompt {
            wire.push(WireMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for message in messages {
            let role = match message.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            wire.push(WireMessage {
                role: role.to_string(),
                content: message.content.clone(),
            });
        }

        if self.config.strict_role_alternation {
            wire = merge_consecutive_roles(wire);
        }
        wire
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        stream: bool,
    ) -> ChatCompletionRequest {
        let model = self.resolve_model(options).to_string();
        let reasoning = Self::is_reasoning_model(&model);

        ChatCompletionRequest {
            messages: self.build_wire_messages(messages, options),
            max_tokens: if reasoning { None } else { options.max_tokens },
            max_completion_tokens: if reasoning { options.max_tokens } else { None },
            temperature: if reasoning { None } else { options.temperature },
            response_format: match options.response_format {
                ResponseFormat::Json => Some(WireResponseFormat {
                    format_type: "json_object".to_string(),
                }),
                ResponseFormat::Text => None,
            },
            stream,
            model,
        }
    }

    async fn post(
        &self,
        request: &ChatCompletionRequest,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> LlmResult<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.config.api_key))
            .header(header::CONTENT_TYPE, "application/json");
        for (key, value) in &self.config.headers {
            builder = builder.header(key, value);
        }

        let send = builder.json(request).send();
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = send => result.map_err(|e| self.map_reqwest_error(&e))?,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        Err(self.map_status_error(status, response).await)
    }

    fn map_reqwest_error(&self, error: &reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout {
                seconds: self.config.timeout.as_secs(),
            }
        } else {
            LlmError::Connection {
                message: error.to_string(),
            }
        }
    }

    async fn map_status_error(&self, status: StatusCode, response: reqwest::Response) -> LlmError {
        let retry_after_ms = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(|seconds| seconds * 1000);

        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<WireErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .ok();
        let message = detail
            .as_ref()
            .map_or_else(|| truncate(&body, 200), |d| d.message.clone());
        let error_type = detail.as_ref().and_then(|d| d.error_type.clone());

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::Auth { message },
            StatusCode::TOO_MANY_REQUESTS => {
                if error_type.as_deref() == Some("insufficient_quota") {
                    LlmError::Quota { message }
                } else {
                    LlmError::RateLimit {
                        message,
                        retry_after_ms,
                    }
                }
            }
            StatusCode::PAYMENT_REQUIRED => LlmError::Quota { message },
            StatusCode::NOT_FOUND => LlmError::ModelUnavailable {
                model: self.config.default_model.clone(),
            },
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                LlmError::InvalidRequest { message }
            }
            status if status.is_server_error() => LlmError::ServerError {
                status: status.as_u16(),
                message,
            },
            status => LlmError::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    fn detect_refusal(&self, choice: &WireChoice) -> Option<LlmError> {
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Some(LlmError::Refusal {
                message: "response stopped by content filter".to_string(),
            });
        }
        if let Some(refusal) = &choice.message.refusal {
            return Some(LlmError::Refusal {
                message: refusal.clone(),
            });
        }
        let text = choice.message.content.as_deref().unwrap_or("").trim();
        let lowered = text.to_lowercase();
        if self
            .config
            .refusal_patterns
            .iter()
            .any(|pattern| lowered.starts_with(pattern.as_str()))
        {
            return Some(LlmError::Refusal {
                message: truncate(text, 200),
            });
        }
        None
    }

    fn report_usage(&self, model: &str, usage: TokenUsage) {
        if let Some(callback) = &self.config.on_usage {
            callback(&UsageReport {
                provider: self.config.id.clone(),
                model: model.to_string(),
                usage,
            });
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.config.id.clone(),
            name: format!("OpenAI-compatible ({})", self.config.base_url),
            supports_json: true,
            supports_streaming: true,
            default_model: self.config.default_model.clone(),
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<ChatOutcome> {
        let request = self.build_request(messages, options, false);
        trace!("chat request to {} ({})", self.config.id, request.model);

        let response = self.post(&request, &options.cancel).await?;
        let body: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::Parse {
                message: format!("malformed completion response: {e}"),
            })?;

        let choice = body.choices.first().ok_or_else(|| LlmError::Parse {
            message: "completion response carried no choices".to_string(),
        })?;

        if let Some(refusal) = self.detect_refusal(choice) {
            return Err(refusal);
        }

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        self.report_usage(&request.model, usage);

        Ok(ChatOutcome {
            text: choice.message.content.clone().unwrap_or_default(),
            model: body.model.unwrap_or(request.model),
            usage,
            stop_reason: choice.finish_reason.clone(),
        })
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<mpsc::Receiver<StreamEvent>> {
        let request = self.build_request(messages, options, true);
        let model = request.model.clone();
        let response = self.post(&request, &options.cancel).await?;

        let (tx, rx) = mpsc::channel(100);
        let cancel = options.cancel.clone();
        let on_usage = self.config.on_usage.clone();
        let provider_id = self.config.id.clone();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut text = String::new();
            let mut usage = TokenUsage::default();
            let mut stop_reason = None;

            loop {
                let chunk = tokio::select! {
                    () = cancel.cancelled() => {
                        let _ = tx.send(StreamEvent::Error(LlmError::Cancelled)).await;
                        return;
                    }
                    chunk = stream.next() => match chunk {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            let _ = tx
                                .send(StreamEvent::Error(LlmError::Connection {
                                    message: e.to_string(),
                                }))
                                .await;
                            return;
                        }
                        None => break,
                    }
                };

                for event in decoder.push(&chunk) {
                    if event.is_done() {
                        continue;
                    }
                    let Some(parsed) =
                        serde_json::from_str::<ChatStreamChunk>(&event.data).ok()
                    else {
                        warn!("skipping malformed stream chunk");
                        continue;
                    };
                    for choice in parsed.choices {
                        if let Some(delta) = choice.delta.content
                            && !delta.is_empty()
                        {
                            text.push_str(&delta);
                            if tx.send(StreamEvent::Delta(delta)).await.is_err() {
                                return;
                            }
                        }
                        if choice.finish_reason.is_some() {
                            stop_reason = choice.finish_reason;
                        }
                    }
                    if let Some(u) = parsed.usage {
                        usage = TokenUsage::new(u.prompt_tokens, u.completion_tokens);
                    }
                }
            }

            if let Some(callback) = on_usage {
                callback(&UsageReport {
                    provider: provider_id,
                    model: model.clone(),
                    usage,
                });
            }
            let _ = tx
                .send(StreamEvent::Done(ChatOutcome {
                    text,
                    model,
                    usage,
                    stop_reason,
                }))
                .await;
        });

        debug!("streaming chat started");
        Ok(rx)
    }
}

fn merge_consecutive_roles(messages: Vec<WireMessage>) -> Vec<WireMessage> {
    let mut merged: Vec<WireMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == message.role && last.role != "system" => {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
            }
            _ => merged.push(message),
        }
    }
    merged
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let cut = text.char_indices().nth(max).map_or(text.len(), |(i, _)| i);
    format!("{}...", &text[..cut])
}

// ============================================================================
// Wire types (OpenAI chat-completions format)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    content: Option<String>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct WireErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatStreamDelta {
    content: Option<String>,
}
