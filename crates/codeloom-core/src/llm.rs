//! Completion contract
//!
//! The engine talks to LLM transports through [`CompletionClient`];
//! implementations live in `codeloom-llm`. Fence extraction sits here
//! because both the executor and the transports share it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One chat message on the completion wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Why the model stopped emitting tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    EndTurn,
    Length,
    ToolCalls,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Parse a vendor finish reason string.
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "end_turn" => Self::EndTurn,
            "length" => Self::Length,
            "tool_calls" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            other => Self::Other(other.to_string()),
        }
    }

    /// Every reason except `length` ends the continuation loop.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Length)
    }
}

/// The assembled outcome of a completion call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Full concatenated text across all continuation rounds.
    pub text: String,
    pub finish: FinishReason,
    /// Non-fatal oddity, e.g. the continuation ceiling was reached before a
    /// terminal finish reason arrived.
    pub warning: Option<String>,
}

impl Completion {
    pub fn new(text: impl Into<String>, finish: FinishReason) -> Self {
        Self {
            text: text.into(),
            finish,
            warning: None,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

/// Transport errors surfaced by completion clients.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http error: {0}")]
    Http(String),
    #[error("response error: {0}")]
    Response(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A completion transport. Stateless between calls; safe to share.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        endpoint: &crate::types::ApiEndpoint,
    ) -> Result<Completion, LlmError>;
}

#[async_trait]
impl CompletionClient for std::sync::Arc<dyn CompletionClient> {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        endpoint: &crate::types::ApiEndpoint,
    ) -> Result<Completion, LlmError> {
        (**self).complete(messages, endpoint).await
    }
}

/// Return the contents of the first triple-backtick fenced block, trimmed;
/// the opening fence may carry a language tag. Responses without a fence
/// come back whole, trimmed.
pub fn extract_code_block(text: &str) -> String {
    let Some(open) = text.find("```") else {
        return text.trim().to_string();
    };

    let after_fence = &text[open + 3..];
    // Skip the language tag (everything up to the end of the fence line).
    let body_start = match after_fence.find('\n') {
        Some(nl) => nl + 1,
        None => return text.trim().to_string(),
    };
    let body = &after_fence[body_start..];

    match body.find("```") {
        Some(close) => body[..close].trim().to_string(),
        None => body.trim().to_string(),
    }
}
