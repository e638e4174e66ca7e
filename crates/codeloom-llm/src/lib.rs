//! # Codeloom LLM
//!
//! Completion transport implementations:
//! - [`ChatRelayClient`]: relay through an external chat endpoint, single
//!   response, no streaming
//! - [`DirectStreamClient`]: OpenAI-style streaming chat completion with
//!   continuation-on-truncation
//! - [`TransportRouter`]: dispatches a step's `ApiEndpoint` to the right
//!   transport
//!
//! All clients are stateless between calls and safe to share.

mod direct;
mod relay;
mod router;
mod settings;

pub use direct::{DirectStreamClient, DirectStreamConfig, CONTINUATION_PROMPT};
pub use relay::{ChatRelayClient, ChatRelayConfig};
pub use router::TransportRouter;
pub use settings::ProviderSettings;

use std::sync::Mutex;

use async_trait::async_trait;
use codeloom_core::llm::{ChatMessage, Completion, CompletionClient, FinishReason, LlmError};
use codeloom_core::types::ApiEndpoint;

/// Mock completion client for tests and examples.
pub struct MockCompletionClient {
    pub response: String,
    calls: Mutex<Vec<String>>,
}

impl MockCompletionClient {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Payloads received so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for MockCompletionClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _endpoint: &ApiEndpoint,
    ) -> Result<Completion, LlmError> {
        if let Some(last) = messages.last() {
            self.calls.lock().unwrap().push(last.content.clone());
        }
        Ok(Completion::new(self.response.clone(), FinishReason::Stop))
    }
}
