use super::{event_stream, function_tools, Backend, EventStream, FrameHandler, HttpTransport};
use crate::config::BackendSettings;
use crate::wire::sse_frames;
use async_trait::async_trait;
use futures_util::StreamExt;
use modelmux_core::{
    ChatRequest, ChatResult, LlmError, LlmResult, Message, Role, StreamEvent, ToolCall, Usage,
};
use modelmux_tools::ToolSpec;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// Base URL used when neither settings nor `OPENAI_BASE_URL` name one.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const DONE_SENTINEL: &str = "[DONE]";

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI and any server implementing `/chat/completions`
/// (OpenRouter, Groq, vLLM, llama.cpp server, ...).
pub struct OpenAiBackend {
    api_key: String,
    base_url: String,
    http: HttpTransport,
}

impl OpenAiBackend {
    /// Creates a backend for `base_url` (e.g. `https://api.openai.com/v1`)
    /// authenticating with `api_key`.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            api_key: api_key.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http: HttpTransport::default(),
        }
    }

    /// Resolves the key from `OPENAI_API_KEY` and the base URL from
    /// `OPENAI_BASE_URL` when `settings` leaves them unset.
    pub fn from_settings(settings: &BackendSettings) -> LlmResult<Self> {
        let api_key = settings.api_key_or_env("OPENAI_API_KEY")?;
        let base_url = settings.base_url_or_env("OPENAI_BASE_URL", DEFAULT_BASE_URL);
        let backend = Self::new(api_key, base_url);
        match settings.http_timeout() {
            Some(timeout) => backend.with_timeout(timeout),
            None => Ok(backend),
        }
    }

    /// Bounds each HTTP request, reading the body included. A request that
    /// runs out of time fails with [`LlmError::Timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> LlmResult<Self> {
        self.http = HttpTransport::with_timeout(timeout)?;
        Ok(self)
    }

    fn build_body(&self, request: &ChatRequest, tools: &[ToolSpec], stream: bool) -> Value {
        let mut body = request.to_payload();
        body.insert(
            "messages".into(),
            Value::Array(request.messages.iter().map(build_message).collect()),
        );
        if let Some(format) = request.response_format {
            body.insert("response_format".into(), json!({ "type": format.as_str() }));
        }
        if !tools.is_empty() {
            body.insert("tools".into(), Value::Array(function_tools(tools)));
        }
        if stream {
            body.insert("stream".into(), Value::Bool(true));
        }
        Value::Object(body)
    }

    async fn send(&self, body: &Value) -> LlmResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, "POST chat completion");
        let request = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        self.http.post_json(request, body).await
    }
}

fn build_message(m: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert("role".into(), Value::from(m.role.as_str()));
    obj.insert("content".into(), Value::from(m.content.as_str()));
    if let Some(name) = m.name.as_deref().filter(|n| !n.is_empty()) {
        obj.insert("name".into(), Value::from(name));
    }
    match m.role {
        Role::Tool => {
            let id = m
                .tool_call_id
                .as_deref()
                .filter(|id| !id.is_empty())
                .or(m.tool_name.as_deref())
                .unwrap_or_default();
            obj.insert("tool_call_id".into(), Value::from(id));
        }
        Role::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.correlation_id(),
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments_json },
                    })
                })
                .collect();
            obj.insert("tool_calls".into(), Value::Array(calls));
        }
        _ => {}
    }
    Value::Object(obj)
}

/// Converts a `/chat/completions` response body into a canonical result.
///
/// Missing `usage` or `tool_calls` are treated as empty.
pub fn parse_openai_response(body: Value) -> ChatResult {
    let message = &body["choices"][0]["message"];
    let text = message["content"].as_str().unwrap_or_default().to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let function = &tc["function"];
                    ToolCall::from_value(
                        tc["id"].as_str().unwrap_or_default(),
                        function["name"].as_str().unwrap_or_default(),
                        function["arguments"].clone(),
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let usage = &body["usage"];
    let usage = Usage::new(
        usage["prompt_tokens"].as_u64(),
        usage["completion_tokens"].as_u64(),
        usage["total_tokens"].as_u64(),
    );

    ChatResult {
        text,
        usage,
        tool_calls,
        raw: body,
        parsed: None,
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    index: u64,
    id: String,
    name: String,
    arguments: String,
}

/// Buffers tool-call fragments per `index` until the stream ends.
#[derive(Debug)]
pub(crate) struct OpenAiStream {
    status: u16,
    calls: Vec<PendingCall>,
}

impl OpenAiStream {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            calls: Vec::new(),
        }
    }

    fn accumulate(&mut self, position: usize, fragment: &Value) {
        let index = fragment["index"].as_u64().unwrap_or(position as u64);
        let pos = match self.calls.iter().position(|c| c.index == index) {
            Some(pos) => pos,
            None => {
                self.calls.push(PendingCall {
                    index,
                    ..PendingCall::default()
                });
                self.calls.len() - 1
            }
        };
        let call = &mut self.calls[pos];
        if let Some(id) = fragment["id"].as_str().filter(|id| !id.is_empty()) {
            call.id = id.to_string();
        }
        let function = &fragment["function"];
        if let Some(name) = function["name"].as_str().filter(|n| !n.is_empty()) {
            call.name = name.to_string();
        }
        if let Some(args) = function["arguments"].as_str() {
            call.arguments.push_str(args);
        }
    }
}

impl FrameHandler for OpenAiStream {
    type Frame = String;

    fn on_frame(&mut self, frame: String, out: &mut Vec<StreamEvent>) -> LlmResult<bool> {
        if frame == DONE_SENTINEL {
            return Ok(true);
        }
        let obj: Value = serde_json::from_str(&frame)
            .map_err(|e| LlmError::Parse(format!("invalid stream frame {frame:?}: {e}")))?;
        if let Some(err) = obj.get("error") {
            return Err(LlmError::Provider {
                status: self.status,
                body: err.to_string(),
            });
        }

        let delta = &obj["choices"][0]["delta"];
        if let Some(text) = delta["content"].as_str().filter(|t| !t.is_empty()) {
            out.push(StreamEvent::text(text));
        }
        if let Some(fragments) = delta["tool_calls"].as_array() {
            for (position, fragment) in fragments.iter().enumerate() {
                self.accumulate(position, fragment);
            }
        }
        Ok(false)
    }

    fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        for call in self.calls.drain(..) {
            let id = if call.id.is_empty() {
                call.index.to_string()
            } else {
                call.id
            };
            out.push(StreamEvent::ToolCall {
                call: ToolCall::from_json_text(id, call.name, &call.arguments),
            });
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<ChatResult> {
        let body = self.build_body(request, tools, false);
        let resp = self.send(&body).await?;
        Ok(parse_openai_response(self.http.read_json(resp).await?))
    }

    async fn stream(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<EventStream> {
        let body = self.build_body(request, tools, true);
        let resp = self.send(&body).await?;
        let status = resp.status().as_u16();
        let frames = sse_frames(self.http.body_stream(resp)).boxed();
        Ok(event_stream(frames, OpenAiStream::new(status)))
    }
}
