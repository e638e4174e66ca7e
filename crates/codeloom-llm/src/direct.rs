//! Direct streaming transport
//!
//! Speaks OpenAI-style chat completion over HTTPS with streaming SSE
//! deltas. When the vendor cuts a response off with `finish_reason =
//! length`, the accumulated text is appended as an assistant message, the
//! fixed continuation prompt is appended as a user message, and the call
//! is re-issued until a terminal reason arrives or the continuation
//! ceiling is hit.

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use codeloom_core::llm::{ChatMessage, Completion, FinishReason, LlmError};

const MAX_RESPONSE_LOG_CHARS: usize = 4_000;

/// The fixed prompt appended when resuming a truncated completion.
pub const CONTINUATION_PROMPT: &str = "Continue directly from the previous content, ensure seamless continuation, correct syntax, no repetition, do not acknowledge — just continue.";

/// Direct transport configuration (OpenAI-compatible).
#[derive(Debug, Clone)]
pub struct DirectStreamConfig {
    /// Full chat-completions URL.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// How many continuation rounds may follow the initial request.
    pub max_continuations: u32,
}

impl Default for DirectStreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            timeout_secs: 300,
            max_continuations: 8,
        }
    }
}

/// Streaming client with continuation-on-truncation.
pub struct DirectStreamClient {
    client: reqwest::Client,
    config: DirectStreamConfig,
}

#[derive(Debug, Serialize)]
struct ChatStreamRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    /// Diagnostic-only; consumed and discarded.
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl DirectStreamClient {
    pub fn new(config: DirectStreamConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Run the full completion, continuing across truncations.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion, LlmError> {
        let mut conversation = messages;
        let mut full = String::new();
        let mut rounds: u32 = 0;

        loop {
            let (text, finish) = self.stream_once(&conversation).await?;
            full.push_str(&text);
            let finish = finish.unwrap_or(FinishReason::Stop);

            if finish.is_terminal() {
                tracing::info!(
                    finish = ?finish,
                    rounds,
                    chars = full.chars().count(),
                    "direct completion finished"
                );
                return Ok(Completion::new(full, finish));
            }

            if rounds >= self.config.max_continuations {
                let warning = format!(
                    "continuation ceiling ({}) reached before a terminal finish reason",
                    self.config.max_continuations
                );
                tracing::warn!(rounds, "{}", warning);
                return Ok(Completion::new(full, finish).with_warning(warning));
            }

            rounds += 1;
            tracing::info!(round = rounds, "response truncated, continuing");
            conversation = with_continuation(conversation, &full);
        }
    }

    async fn stream_once(
        &self,
        messages: &[ChatMessage],
    ) -> Result<(String, Option<FinishReason>), LlmError> {
        let body = ChatStreamRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            stream: true,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Response(format!(
                "HTTP {}: {}",
                status,
                truncate_for_log(&text, MAX_RESPONSE_LOG_CHARS)
            )));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();
        let mut finish: Option<FinishReason> = None;

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Stream(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(nl) = buffer.find('\n') {
                let line: String = buffer.drain(..=nl).collect();
                if consume_sse_line(line.trim_end(), &mut text, &mut finish)? {
                    break 'outer;
                }
            }
        }

        Ok((text, finish))
    }
}

/// Append the partial assistant turn and the fixed continue prompt.
fn with_continuation(mut conversation: Vec<ChatMessage>, accumulated: &str) -> Vec<ChatMessage> {
    conversation.push(ChatMessage::assistant(accumulated));
    conversation.push(ChatMessage::user(CONTINUATION_PROMPT));
    conversation
}

/// Consume one SSE line. Returns true on the `[DONE]` sentinel.
fn consume_sse_line(
    line: &str,
    text: &mut String,
    finish: &mut Option<FinishReason>,
) -> Result<bool, LlmError> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        // Comments, event names, and blank keep-alive lines.
        return Ok(false);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(true);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|e| LlmError::Stream(format!("malformed stream payload: {}", e)))?;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            text.push_str(&content);
        }
        // reasoning_content is diagnostic-only.
        let _ = choice.delta.reasoning_content;
        if let Some(reason) = choice.finish_reason {
            *finish = Some(FinishReason::from_wire(&reason));
        }
    }
    Ok(false)
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    let char_count = input.chars().count();
    if char_count <= max_chars {
        return input.to_string();
    }
    let mut preview: String = input.chars().take(max_chars).collect();
    preview.push_str(&format!("... [truncated, total_chars={}]", char_count));
    preview
}
