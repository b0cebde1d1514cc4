//! Streaming chat-model integration
//!
//! A single async backend trait plus the Bedrock-hosted Anthropic streaming
//! client used in production. Token deltas are pushed into an `mpsc` channel
//! so the caller can overlap segmentation and synthesis with generation.

pub mod backend;
pub mod prompt;

pub use backend::{BedrockBackend, BedrockConfig, FinishReason, GenerationResult, LlmBackend};
pub use prompt::{build_messages, Message, Role, SYSTEM_PROMPT};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}
