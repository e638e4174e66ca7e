//! Provider settings
//!
//! Environment pass-through read once at bootstrap; the engine receives
//! this struct at construction and never touches the environment per call.

use codeloom_core::types::ModelKind;

use crate::{ChatRelayConfig, DirectStreamConfig};

/// Every environment variable the transports care about, resolved once.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub openai_api_base: Option<String>,
    pub openai_model: Option<String>,
    pub openai_api_key_coder: Option<String>,
    pub openai_api_base_coder: Option<String>,
    pub openai_model_coder: Option<String>,
    pub chat_api_url: Option<String>,
    pub generate_react_api_url: Option<String>,
    pub port: Option<u16>,
}

impl ProviderSettings {
    /// Read the pass-through variables from the process environment.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: read("OPENAI_API_KEY"),
            openai_api_base: read("OPENAI_API_BASE"),
            openai_model: read("OPENAI_MODEL"),
            openai_api_key_coder: read("OPENAI_API_KEY_CODER"),
            openai_api_base_coder: read("OPENAI_API_BASE_CODER"),
            openai_model_coder: read("OPENAI_MODEL_CODER"),
            chat_api_url: read("CHAT_API_URL"),
            generate_react_api_url: read("GENERATE_REACT_API_URL"),
            port: read("PORT").and_then(|v| v.parse().ok()),
        }
    }

    /// Relay configuration, when `CHAT_API_URL` is set.
    pub fn relay_config(&self) -> Option<ChatRelayConfig> {
        self.chat_api_url.clone().map(ChatRelayConfig::new)
    }

    /// Direct transport configuration for a model kind. Qianwen uses the
    /// base `OPENAI_*` triple; Deepseek uses the `_CODER` triple, falling
    /// back to the base values where unset.
    pub fn direct_config(&self, model: ModelKind) -> DirectStreamConfig {
        let (key, base, name) = match model {
            ModelKind::Qianwen => (
                self.openai_api_key.clone(),
                self.openai_api_base.clone(),
                self.openai_model.clone(),
            ),
            ModelKind::Deepseek => (
                self.openai_api_key_coder
                    .clone()
                    .or_else(|| self.openai_api_key.clone()),
                self.openai_api_base_coder
                    .clone()
                    .or_else(|| self.openai_api_base.clone()),
                self.openai_model_coder
                    .clone()
                    .or_else(|| self.openai_model.clone()),
            ),
        };

        let mut config = DirectStreamConfig::default();
        if let Some(base) = base {
            config.endpoint = completions_url(&base);
        }
        if let Some(name) = name {
            config.model = name;
        }
        config.api_key = key;
        config
    }
}

/// `OPENAI_API_BASE` names the API root; the chat-completions path is
/// appended unless the base already carries it.
fn completions_url(base: &str) -> String {
    let trimmed = base.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{}/chat/completions", trimmed)
    }
}

fn read(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
