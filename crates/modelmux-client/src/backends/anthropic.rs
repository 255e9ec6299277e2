use super::{replay_result, Backend, EventStream, HttpTransport};
use crate::config::BackendSettings;
use async_trait::async_trait;
use modelmux_core::{ChatRequest, ChatResult, LlmResult, Message, Role, ToolCall, Usage};
use modelmux_tools::ToolSpec;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Base URL used when neither settings nor `ANTHROPIC_BASE_URL` name one.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
/// Value of the `anthropic-version` header unless overridden.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on this API; used when the request has none.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic Messages API backend.
///
/// Streaming is served by one blocking call replayed as events, so the first
/// event arrives only once the whole answer is ready.
pub struct AnthropicBackend {
    api_key: String,
    base_url: String,
    version: String,
    http: HttpTransport,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

impl AnthropicBackend {
    /// Creates a backend for `base_url` sending `version` as the
    /// `anthropic-version` header.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            version: version.into(),
            http: HttpTransport::default(),
        }
    }

    /// Falls back to `ANTHROPIC_API_KEY`, `ANTHROPIC_BASE_URL` and
    /// `ANTHROPIC_VERSION` for whatever `settings` leaves unset.
    pub fn from_settings(settings: &BackendSettings) -> LlmResult<Self> {
        let api_key = settings.api_key_or_env("ANTHROPIC_API_KEY")?;
        let base_url = settings.base_url_or_env("ANTHROPIC_BASE_URL", DEFAULT_BASE_URL);
        let version = settings.api_version_or_env("ANTHROPIC_VERSION", DEFAULT_API_VERSION);
        let backend = Self::new(api_key, base_url, version);
        match settings.http_timeout() {
            Some(timeout) => backend.with_timeout(timeout),
            None => Ok(backend),
        }
    }

    /// Bounds each HTTP request, reading the body included.
    pub fn with_timeout(mut self, timeout: Duration) -> LlmResult<Self> {
        self.http = HttpTransport::with_timeout(timeout)?;
        Ok(self)
    }

    fn build_body(&self, request: &ChatRequest, tools: &[ToolSpec]) -> Value {
        let (system, messages) = build_messages(&request.messages);

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = Value::from(system);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = Value::from(t);
        }
        if !tools.is_empty() {
            let tools: Vec<AnthropicTool<'_>> = tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect();
            body["tools"] = json!(tools);
        }
        for (k, v) in &request.extra {
            body[k.as_str()] = v.clone();
        }
        body
    }
}

/// Splits the conversation into the joined system prompt and the role-tagged
/// turns the Messages API expects.
///
/// Tool results become `tool_result` blocks of a user turn; consecutive
/// results share one turn.
fn build_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system = Vec::new();
    let mut turns: Vec<Value> = Vec::new();
    let mut open_results = false;

    for m in messages {
        match m.role {
            Role::System => {
                system.push(m.content.as_str());
                continue;
            }
            Role::Tool => {
                let tool_use_id = m
                    .tool_call_id
                    .as_deref()
                    .filter(|id| !id.is_empty())
                    .or(m.tool_name.as_deref())
                    .unwrap_or_default();
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": m.content,
                });
                let appended = open_results
                    && turns
                        .last_mut()
                        .and_then(|t| t["content"].as_array_mut())
                        .map(|blocks| blocks.push(block.clone()))
                        .is_some();
                if !appended {
                    turns.push(json!({ "role": "user", "content": [block] }));
                }
                open_results = true;
                continue;
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let mut blocks = Vec::new();
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                blocks.extend(m.tool_calls.iter().map(|c| {
                    json!({
                        "type": "tool_use",
                        "id": c.correlation_id(),
                        "name": c.name,
                        "input": c.arguments,
                    })
                }));
                turns.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::User | Role::Assistant => {
                turns.push(json!({ "role": m.role.as_str(), "content": m.content }));
            }
        }
        open_results = false;
    }

    let system = (!system.is_empty()).then(|| system.join("\n"));
    (system, turns)
}

/// Converts a Messages API response body into a canonical result.
pub fn parse_anthropic_response(body: Value) -> ChatResult {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in body["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => text.push_str(block["text"].as_str().unwrap_or_default()),
            Some("tool_use") => tool_calls.push(ToolCall::from_value(
                block["id"].as_str().unwrap_or_default(),
                block["name"].as_str().unwrap_or_default(),
                block["input"].clone(),
            )),
            _ => {}
        }
    }

    let usage = &body["usage"];
    let usage = Usage::new(
        usage["input_tokens"].as_u64(),
        usage["output_tokens"].as_u64(),
        None,
    );

    ChatResult {
        text,
        usage,
        tool_calls,
        raw: body,
        parsed: None,
    }
}

#[async_trait]
impl Backend for AnthropicBackend {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<ChatResult> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(url = %url, "POST messages");
        let body = self.build_body(request, tools);
        let http = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .header("content-type", "application/json");
        let resp = self.http.post_json(http, &body).await?;
        Ok(parse_anthropic_response(self.http.read_json(resp).await?))
    }

    async fn stream(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<EventStream> {
        let result = self.chat(request, tools).await?;
        Ok(replay_result(result))
    }
}
