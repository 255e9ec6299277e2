use super::{event_stream, function_tools, Backend, EventStream, FrameHandler, HttpTransport};
use crate::config::BackendSettings;
use crate::wire::ndjson_frames;
use async_trait::async_trait;
use futures_util::StreamExt;
use modelmux_core::{
    ChatRequest, ChatResult, LlmError, LlmResult, Message, ResponseFormat, Role, StreamEvent,
    ToolCall, Usage,
};
use modelmux_tools::ToolSpec;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

/// Base URL used when neither settings nor `OLLAMA_BASE_URL` name one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama server, `/api/chat` endpoint. No authentication.
pub struct OllamaBackend {
    base_url: String,
    http: HttpTransport,
}

impl OllamaBackend {
    /// Creates a backend for the server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: HttpTransport::default(),
        }
    }

    /// Uses `OLLAMA_BASE_URL` when `settings` has no base URL.
    pub fn from_settings(settings: &BackendSettings) -> LlmResult<Self> {
        let backend = Self::new(settings.base_url_or_env("OLLAMA_BASE_URL", DEFAULT_BASE_URL));
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

    fn build_body(&self, request: &ChatRequest, tools: &[ToolSpec], stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), Value::from(request.model.as_str()));
        body.insert(
            "messages".into(),
            Value::Array(request.messages.iter().map(build_message).collect()),
        );
        body.insert("stream".into(), Value::Bool(stream));

        let mut options = Map::new();
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), Value::from(t));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".into(), Value::from(n));
        }
        if !options.is_empty() {
            body.insert("options".into(), Value::Object(options));
        }
        if request.response_format == Some(ResponseFormat::JsonObject) {
            body.insert("format".into(), Value::from("json"));
        }
        if !tools.is_empty() {
            body.insert("tools".into(), Value::Array(function_tools(tools)));
        }
        for (k, v) in &request.extra {
            body.insert(k.clone(), v.clone());
        }
        Value::Object(body)
    }

    async fn send(&self, body: &Value) -> LlmResult<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        debug!(url = %url, "POST chat");
        self.http.post_json(self.http.post(&url), body).await
    }
}

fn build_message(m: &Message) -> Value {
    let mut obj = Map::new();
    obj.insert("role".into(), Value::from(m.role.as_str()));
    obj.insert("content".into(), Value::from(m.content.as_str()));
    match m.role {
        Role::Tool => {
            let name = m
                .tool_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .or(m.tool_call_id.as_deref())
                .unwrap_or_default();
            obj.insert("tool_name".into(), Value::from(name));
        }
        Role::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<Value> = m
                .tool_calls
                .iter()
                .map(|c| json!({ "function": { "name": c.name, "arguments": c.arguments } }))
                .collect();
            obj.insert("tool_calls".into(), Value::Array(calls));
        }
        _ => {}
    }
    Value::Object(obj)
}

fn parse_tool_calls(message: &Value) -> Vec<ToolCall> {
    message["tool_calls"]
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
        .unwrap_or_default()
}

/// Converts an `/api/chat` response body into a canonical result.
///
/// Tool calls usually come without an id; they are correlated by name.
pub fn parse_ollama_response(body: Value) -> ChatResult {
    let message = &body["message"];
    let text = message["content"].as_str().unwrap_or_default().to_string();
    let tool_calls = parse_tool_calls(message);
    let usage = Usage::new(
        body["prompt_eval_count"].as_u64(),
        body["eval_count"].as_u64(),
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

/// Emits content as it arrives and holds tool calls back until the end.
#[derive(Debug)]
pub(crate) struct OllamaStream {
    status: u16,
    calls: Vec<ToolCall>,
}

impl OllamaStream {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            calls: Vec::new(),
        }
    }
}

impl FrameHandler for OllamaStream {
    type Frame = Value;

    fn on_frame(&mut self, frame: Value, out: &mut Vec<StreamEvent>) -> LlmResult<bool> {
        if let Some(err) = frame.get("error") {
            let body = err
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            return Err(LlmError::Provider {
                status: self.status,
                body,
            });
        }

        let message = &frame["message"];
        if let Some(text) = message["content"].as_str().filter(|t| !t.is_empty()) {
            out.push(StreamEvent::text(text));
        }
        self.calls.extend(parse_tool_calls(message));
        Ok(frame["done"].as_bool() == Some(true))
    }

    fn finish(&mut self, out: &mut Vec<StreamEvent>) {
        out.extend(
            self.calls
                .drain(..)
                .map(|call| StreamEvent::ToolCall { call }),
        );
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn chat(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<ChatResult> {
        let body = self.build_body(request, tools, false);
        let resp = self.send(&body).await?;
        Ok(parse_ollama_response(self.http.read_json(resp).await?))
    }

    async fn stream(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<EventStream> {
        let body = self.build_body(request, tools, true);
        let resp = self.send(&body).await?;
        let status = resp.status().as_u16();
        let frames = ndjson_frames(self.http.body_stream(resp)).boxed();
        Ok(event_stream(frames, OllamaStream::new(status)))
    }
}
