//! Local Ollama endpoint driver.
//!
//! Speaks the native `/api/chat` interface of a locally-running Ollama
//! daemon. No API key, no refusal filtering, no JSON response mode beyond
//! Ollama's `format: "json"` hint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::{
    ChatMessage, ChatOutcome, CompletionOptions, LlmError, LlmProvider, LlmResult, MessageRole,
    ProviderInfo, ResponseFormat, TokenUsage, UsageCallback, UsageReport,
};

/// Configuration for a local Ollama endpoint.
#[derive(Clone)]
pub struct OllamaConfig {
    /// Base URL of the daemon
    pub base_url: String,
    /// Model used when options carry none
    pub default_model: String,
    /// Request timeout (local generation can be slow)
    pub timeout: Duration,
    /// Callback invoked with usage after every successful call
    pub on_usage: Option<UsageCallback>,
}

impl std::fmt::Debug for OllamaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaConfig")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "llama3.2".to_string(),
            timeout: Duration::from_secs(120),
            on_usage: None,
        }
    }
}

/// Ollama local model provider.
pub struct OllamaProvider {
    config: OllamaConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OllamaProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaProvider")
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OllamaProvider {
    /// Create a provider for the configured daemon.
    pub fn new(config: OllamaConfig) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest {
                message: format!("http client build: {e}"),
            })?;
        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "ollama".to_string(),
            name: format!("Ollama ({})", self.config.base_url),
            supports_json: true,
            supports_streaming: false,
            default_model: self.config.default_model.clone(),
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> LlmResult<ChatOutcome> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());

        let mut wire_messages = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = &options.system_prompt {
            wire_messages.push(WireMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for message in messages {
            wire_messages.push(WireMessage {
                role: match message.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                }
                .to_string(),
                content: message.content.clone(),
            });
        }

        let request = OllamaChatRequest {
            model: model.clone(),
            messages: wire_messages,
            stream: false,
            format: match options.response_format {
                ResponseFormat::Json => Some("json".to_string()),
                ResponseFormat::Text => None,
            },
            options: OllamaOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            },
        };
        trace!("ollama chat request ({})", model);

        let send = self.client.post(self.chat_url()).json(&request).send();
        let response = tokio::select! {
            () = options.cancel.cancelled() => return Err(LlmError::Cancelled),
            result = send => result.map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout { seconds: self.config.timeout.as_secs() }
                } else {
                    LlmError::Connection { message: e.to_string() }
                }
            })?,
        };

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelUnavailable { model });
        }
        if status.is_server_error() {
            return Err(LlmError::ServerError {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(LlmError::InvalidRequest {
                message: format!(
                    "ollama returned {status}: {}",
                    response.text().await.unwrap_or_default()
                ),
            });
        }

        let body: OllamaChatResponse = response.json().await.map_err(|e| LlmError::Parse {
            message: format!("malformed ollama response: {e}"),
        })?;

        let usage = TokenUsage::new(
            body.prompt_eval_count.unwrap_or(0),
            body.eval_count.unwrap_or(0),
        );
        if let Some(callback) = &self.config.on_usage {
            callback(&UsageReport {
                provider: "ollama".to_string(),
                model: model.clone(),
                usage,
            });
        }

        Ok(ChatOutcome {
            text: body.message.map(|m| m.content).unwrap_or_default(),
            model,
            usage,
            stop_reason: body.done_reason,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: Option<WireMessage>,
    done_reason: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}
