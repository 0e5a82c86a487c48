use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::ProviderKind;
use crate::retry::RetryPolicy;

const OPENAI_BASE_URL: &str = "https://api.openai.com";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
const MESSAGES_PATH: &str = "/v1/messages";

/// Per-backend request settings.
///
/// Credentials are not part of this struct; a client looks them up through
/// [`crate::CredentialStore`] when a request is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider-specific model identifier.
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum number of output tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Base address of the API. Required for the self-hosted backend.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Request path appended to `base_url`.
    #[serde(default)]
    pub path: Option<String>,
    /// Whether the self-hosted endpoint needs a credential. Hosted backends
    /// always require one.
    #[serde(default)]
    pub auth_required: bool,
}

const fn default_temperature() -> f32 {
    0.7
}

const fn default_max_tokens() -> u32 {
    1024
}

impl ProviderConfig {
    /// Defaults for the hosted OpenAI backend.
    pub fn openai() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: Some(OPENAI_BASE_URL.into()),
            path: Some(CHAT_COMPLETIONS_PATH.into()),
            auth_required: true,
        }
    }

    /// Defaults for the hosted Anthropic backend.
    pub fn anthropic() -> Self {
        Self {
            model: "claude-3-5-sonnet-latest".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: Some(ANTHROPIC_BASE_URL.into()),
            path: Some(MESSAGES_PATH.into()),
            auth_required: true,
        }
    }

    /// Defaults for a self-hosted OpenAI-compatible server.
    ///
    /// No base URL is set, so the backend stays unconfigured until one is
    /// provided.
    pub fn compatible() -> Self {
        Self {
            model: "llama3.1".into(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            base_url: None,
            path: Some(CHAT_COMPLETIONS_PATH.into()),
            auth_required: false,
        }
    }

    pub fn default_for(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAi => Self::openai(),
            ProviderKind::Anthropic => Self::anthropic(),
            ProviderKind::Compatible => Self::compatible(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Overrides the API base URL (for proxies, local servers or tests).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn auth_required(mut self, auth_required: bool) -> Self {
        self.auth_required = auth_required;
        self
    }

    /// Full request URL, or `None` when no base URL is configured.
    pub fn endpoint(&self) -> Option<String> {
        let base = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())?;
        let path = self.path.as_deref().unwrap_or(CHAT_COMPLETIONS_PATH).trim();
        let path = path.trim_start_matches('/');
        Some(format!("{}/{}", base.trim_end_matches('/'), path))
    }
}

/// Settings for the whole provider layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "ProviderConfig::openai")]
    pub openai: ProviderConfig,
    #[serde(default = "ProviderConfig::anthropic")]
    pub anthropic: ProviderConfig,
    #[serde(default = "ProviderConfig::compatible")]
    pub compatible: ProviderConfig,
    /// Retry policy applied to every provider call.
    #[serde(default = "RetryPolicy::standard")]
    pub retry: RetryPolicy,
    /// Idle timeout: a stream that receives no bytes for this long fails with
    /// `Timeout`. Every received chunk restarts the clock, so a slow but
    /// steady stream is never cut off.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

const fn default_idle_timeout_ms() -> u64 {
    30_000
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            openai: ProviderConfig::openai(),
            anthropic: ProviderConfig::anthropic(),
            compatible: ProviderConfig::compatible(),
            retry: RetryPolicy::standard(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl AssistantConfig {
    /// Builds a config from defaults plus optional environment overrides.
    ///
    /// Recognized variables: `OPENAI_MODEL`, `ANTHROPIC_MODEL`,
    /// `COMPATIBLE_BASE_URL`, `COMPATIBLE_MODEL`, `COMPATIBLE_PATH`,
    /// `COMPATIBLE_AUTH_REQUIRED`, `ASSISTANT_IDLE_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();
        if let Some(model) = get("OPENAI_MODEL") {
            config.openai.model = model;
        }
        if let Some(model) = get("ANTHROPIC_MODEL") {
            config.anthropic.model = model;
        }
        if let Some(base_url) = get("COMPATIBLE_BASE_URL") {
            config.compatible.base_url = Some(base_url);
        }
        if let Some(model) = get("COMPATIBLE_MODEL") {
            config.compatible.model = model;
        }
        if let Some(path) = get("COMPATIBLE_PATH") {
            config.compatible.path = Some(path);
        }
        if let Some(flag) = get("COMPATIBLE_AUTH_REQUIRED").and_then(|v| parse_bool(&v)) {
            config.compatible.auth_required = flag;
        }
        if let Some(ms) = get("ASSISTANT_IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.idle_timeout_ms = ms;
        }
        config
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Compatible => &self.compatible,
        }
    }

    pub fn with_provider(mut self, kind: ProviderKind, config: ProviderConfig) -> Self {
        match kind {
            ProviderKind::OpenAi => self.openai = config,
            ProviderKind::Anthropic => self.anthropic = config,
            ProviderKind::Compatible => self.compatible = config,
        }
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms.max(1))
    }
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn endpoint_joins_base_and_path() {
        let config = ProviderConfig::compatible().base_url("http://10.0.0.5:8080/");
        assert_eq!(
            config.endpoint().as_deref(),
            Some("http://10.0.0.5:8080/v1/chat/completions")
        );
        assert_eq!(ProviderConfig::compatible().endpoint(), None);
        assert_eq!(
            ProviderConfig::anthropic().endpoint().as_deref(),
            Some("https://api.anthropic.com/v1/messages")
        );
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("COMPATIBLE_BASE_URL", "http://localhost:11434"),
            ("COMPATIBLE_AUTH_REQUIRED", "yes"),
            ("OPENAI_MODEL", " gpt-4o "),
            ("ASSISTANT_IDLE_TIMEOUT_MS", "5000"),
        ]);
        let config = AssistantConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.openai.model, "gpt-4o");
        assert_eq!(
            config.compatible.base_url.as_deref(),
            Some("http://localhost:11434")
        );
        assert!(config.compatible.auth_required);
        assert_eq!(config.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.anthropic, ProviderConfig::anthropic());
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let config: AssistantConfig = serde_json::from_value(serde_json::json!({
            "compatible": { "model": "qwen2.5", "base_url": "http://gpu-box:8000" }
        }))
        .expect("config");
        assert_eq!(config.compatible.model, "qwen2.5");
        assert_eq!(config.compatible.temperature, 0.7);
        assert_eq!(config.idle_timeout_ms, 30_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.openai, ProviderConfig::openai());
    }
}
