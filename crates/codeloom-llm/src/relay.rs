//! Chat relay transport
//!
//! Relays a single message to an external chat endpoint and returns its
//! reply. No streaming, no continuation.

use serde::{Deserialize, Serialize};

use codeloom_core::llm::LlmError;

/// Relay endpoint configuration.
#[derive(Debug, Clone)]
pub struct ChatRelayConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl ChatRelayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout_secs: 300,
        }
    }
}

/// Client for the external chat relay.
pub struct ChatRelayClient {
    client: reqwest::Client,
    config: ChatRelayConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    message: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    reply: String,
}

impl ChatRelayClient {
    pub fn new(config: ChatRelayConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Send one message; a session id is minted when none is supplied.
    pub async fn send(
        &self,
        message: &str,
        session_id: Option<String>,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let body = RelayRequest {
            message,
            session_id: &session_id,
            system_prompt,
        };

        tracing::debug!(
            url = %self.config.url,
            session_id = %session_id,
            message_len = message.len(),
            "chat relay request"
        );

        let response = self
            .client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Response(format!("HTTP {}: {}", status, text)));
        }

        let parsed: RelayResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Serialization(e.to_string()))?;
        Ok(parsed.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_request_wire_shape() {
        let body = RelayRequest {
            message: "hello",
            session_id: "abc",
            system_prompt: None,
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["message"], "hello");
        assert_eq!(json["sessionId"], "abc");
        assert!(json.get("systemPrompt").is_none());

        let body = RelayRequest {
            message: "hello",
            session_id: "abc",
            system_prompt: Some("be terse"),
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["systemPrompt"], "be terse");
    }

    #[test]
    fn test_relay_response_parses_reply() {
        let parsed: RelayResponse =
            serde_json::from_str(r#"{"reply":"done","extra":1}"#).expect("parse");
        assert_eq!(parsed.reply, "done");
    }
}
