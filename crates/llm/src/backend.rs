//! LLM backend implementations
//!
//! The Bedrock runtime streams Anthropic-format events; deltas are parsed
//! line-wise off the response body and forwarded through an `mpsc` channel
//! as they arrive.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::prompt::{Message, Role};
use crate::LlmError;

/// Backend configuration
#[derive(Debug, Clone)]
pub struct BedrockConfig {
    /// Region hosting the model
    pub region: String,
    /// Model identifier
    pub model_id: String,
    /// Bearer token for the runtime endpoint
    pub api_key: String,
    /// Generation cap in tokens
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            model_id: "anthropic.claude-3-haiku-20240307-v1:0".to_string(),
            api_key: String::new(),
            max_tokens: 180,
            temperature: 0.2,
            top_p: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Generation result
#[derive(Debug, Clone)]
pub struct GenerationResult {
    /// Full generated text
    pub text: String,
    /// Output tokens reported by the provider (0 when unreported)
    pub tokens: usize,
    /// Time to first delta in milliseconds
    pub time_to_first_token_ms: u64,
    /// Total generation time in milliseconds
    pub total_time_ms: u64,
    pub finish_reason: FinishReason,
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Cancelled,
}

/// Streaming chat-model contract.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stream a completion, pushing each text delta into `tx`.
    ///
    /// A closed receiver cancels generation; the partial text accumulated so
    /// far is returned with `FinishReason::Cancelled`.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError>;

    fn model_name(&self) -> &str;
}

/// Bedrock-hosted Anthropic streaming backend.
pub struct BedrockBackend {
    config: BedrockConfig,
    client: Client,
}

impl BedrockBackend {
    pub fn new(config: BedrockConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn invoke_url(&self) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/invoke-with-response-stream",
            self.config.region, self.config.model_id
        )
    }

    fn build_request(&self, messages: &[Message]) -> AnthropicRequest {
        // The system prompt travels in its own field; everything else stays
        // in the messages array.
        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());

        let chat: Vec<AnthropicMessage> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect();

        AnthropicRequest {
            anthropic_version: "bedrock-2023-05-31".to_string(),
            max_tokens: self.config.max_tokens,
            system,
            messages: chat,
            temperature: Some(self.config.temperature),
            top_p: Some(self.config.top_p),
        }
    }
}

#[async_trait]
impl LlmBackend for BedrockBackend {
    async fn generate_stream(
        &self,
        messages: &[Message],
        tx: mpsc::Sender<String>,
    ) -> Result<GenerationResult, LlmError> {
        let start = std::time::Instant::now();
        let request = self.build_request(messages);

        let response = self
            .client
            .post(self.invoke_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .header("accept", "application/vnd.amazon.eventstream")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
        }

        use futures::StreamExt;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();
        let mut first_token_ms = None;
        let mut output_tokens = 0;
        let mut finish_reason = FinishReason::Stop;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer = buffer[line_end + 1..].to_string();

                if line.is_empty() {
                    continue;
                }
                let json_str = line.strip_prefix("data: ").unwrap_or(&line);

                let Ok(event) = serde_json::from_str::<StreamEvent>(json_str) else {
                    tracing::trace!(line = %json_str, "skipping unparseable stream line");
                    continue;
                };
                match event {
                    StreamEvent::ContentBlockDelta { delta } => {
                        if let Delta::TextDelta { text } = delta {
                            if first_token_ms.is_none() {
                                first_token_ms = Some(start.elapsed().as_millis() as u64);
                            }
                            full_text.push_str(&text);
                            if tx.send(text).await.is_err() {
                                finish_reason = FinishReason::Cancelled;
                                break 'outer;
                            }
                        }
                    }
                    StreamEvent::MessageDelta { delta, usage } => {
                        if let Some(reason) = delta.stop_reason {
                            finish_reason = match reason.as_str() {
                                "max_tokens" => FinishReason::Length,
                                _ => FinishReason::Stop,
                            };
                        }
                        if let Some(u) = usage {
                            output_tokens = u.output_tokens;
                        }
                    }
                    StreamEvent::MessageStop => break 'outer,
                    StreamEvent::Error { error } => {
                        return Err(LlmError::Api(error.message));
                    }
                    _ => {}
                }
            }
        }

        let total_time_ms = start.elapsed().as_millis() as u64;
        Ok(GenerationResult {
            text: full_text,
            tokens: output_tokens,
            time_to_first_token_ms: first_token_ms.unwrap_or(total_time_ms),
            total_time_ms,
            finish_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}

// =============================================================================
// Anthropic wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    anthropic_version: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta { delta: Delta },
    ContentBlockStop,
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<UsageDelta>,
    },
    MessageStop,
    Ping,
    Error { error: StreamError },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta { text: String },
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageDelta {
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}
