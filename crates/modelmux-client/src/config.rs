use crate::retry::RetryPolicy;
use crate::tool_loop::{ChatOptions, ToolRuntime};
use modelmux_core::{LlmError, LlmResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings for one backend.
///
/// Every field is optional; unset fields fall back to the backend's
/// environment variables and then to its built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// API key; ignored by backends without authentication.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Server root, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Protocol version header, where the backend has one.
    #[serde(default)]
    pub api_version: Option<String>,
    /// HTTP-level timeout for each request, body included.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn env_var(name: &str) -> Option<String> {
    non_empty(std::env::var(name).ok())
}

impl BackendSettings {
    /// Sets the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Sets the HTTP-level request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// The HTTP-level request timeout, if any.
    pub fn http_timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Explicit key, else `$var`. A missing key is an authentication error.
    pub fn api_key_or_env(&self, var: &str) -> LlmResult<String> {
        non_empty(self.api_key.clone())
            .or_else(|| env_var(var))
            .ok_or_else(|| LlmError::Auth {
                status: None,
                body: format!("{var} is not set"),
            })
    }

    /// Explicit base URL, else `$var`, else `default`; trailing `/` removed.
    pub fn base_url_or_env(&self, var: &str, default: &str) -> String {
        let url = non_empty(self.base_url.clone())
            .or_else(|| env_var(var))
            .unwrap_or_else(|| default.to_string());
        url.trim_end_matches('/').to_string()
    }

    /// Explicit API version, else `$var`, else `default`.
    pub fn api_version_or_env(&self, var: &str, default: &str) -> String {
        non_empty(self.api_version.clone())
            .or_else(|| env_var(var))
            .unwrap_or_else(|| default.to_string())
    }
}

/// Top-level client configuration, usually loaded from TOML.
///
/// ```toml
/// model = "anthropic:claude-3-5-haiku-latest"
/// temperature = 0.2
/// retries = 3
/// tool_runtime = "auto"
///
/// [backend]
/// base_url = "http://localhost:8080"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// `"<provider>:<model>"`; a bare model name uses the default provider.
    pub model: String,
    /// Sampling temperature sent with every request.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Output token cap sent with every request.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Per-attempt timeout. Unset means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Retries after the first attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Whether tool calls are executed automatically.
    #[serde(default)]
    pub tool_runtime: ToolRuntime,
    /// Upper bound on tool rounds.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Connection settings handed to the backend factory.
    #[serde(default)]
    pub backend: BackendSettings,
}

fn default_retries() -> u32 {
    2
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_steps() -> u32 {
    6
}

impl ClientConfig {
    /// Configuration with defaults for everything but the model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: None,
            max_tokens: None,
            timeout_secs: None,
            retries: default_retries(),
            base_delay_ms: default_base_delay_ms(),
            tool_runtime: ToolRuntime::default(),
            max_steps: default_max_steps(),
            backend: BackendSettings::default(),
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(s: &str) -> LlmResult<Self> {
        toml::from_str(s).map_err(|e| LlmError::Config(e.to_string()))
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> LlmResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LlmError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Retry policy built from `retries` and `base_delay_ms`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.base_delay_ms))
    }

    /// Per-attempt timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Tool-loop options built from `tool_runtime` and `max_steps`.
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions::default()
            .with_tool_runtime(self.tool_runtime)
            .with_max_steps(self.max_steps)
    }
}
