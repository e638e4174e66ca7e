//! Transport routing
//!
//! Implements the engine-facing [`CompletionClient`] by dispatching each
//! step's `ApiEndpoint` to the configured transport.

use std::collections::HashMap;

use async_trait::async_trait;

use codeloom_core::llm::{ChatMessage, Completion, CompletionClient, FinishReason, LlmError};
use codeloom_core::types::{ApiEndpoint, ModelKind};

use crate::{ChatRelayClient, DirectStreamClient, ProviderSettings};

/// Routes completion calls to the relay or a direct streaming client.
pub struct TransportRouter {
    relay: Option<ChatRelayClient>,
    direct: HashMap<ModelKind, DirectStreamClient>,
}

impl TransportRouter {
    /// Build every configured transport from provider settings.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, LlmError> {
        let relay = match settings.relay_config() {
            Some(config) => Some(ChatRelayClient::new(config)?),
            None => None,
        };

        let mut direct = HashMap::new();
        for kind in [ModelKind::Qianwen, ModelKind::Deepseek] {
            direct.insert(kind, DirectStreamClient::new(settings.direct_config(kind))?);
        }

        Ok(Self { relay, direct })
    }
}

#[async_trait]
impl CompletionClient for TransportRouter {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        endpoint: &ApiEndpoint,
    ) -> Result<Completion, LlmError> {
        match endpoint {
            ApiEndpoint::ChatRelay => {
                let relay = self.relay.as_ref().ok_or_else(|| {
                    LlmError::Response("CHAT_API_URL is not configured".to_string())
                })?;
                let message = join_user_payload(&messages);
                let reply = relay.send(&message, None, None).await?;
                Ok(Completion::new(reply, FinishReason::Stop))
            }
            ApiEndpoint::DirectStream { model } => {
                let client = self.direct.get(model).ok_or_else(|| {
                    LlmError::Response(format!("no transport configured for model '{}'", model))
                })?;
                client.complete(messages).await
            }
        }
    }
}

/// The relay takes a single message; collapse the conversation into one.
fn join_user_payload(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
