use crate::error::{LlmError, LlmResult};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Hint about the shape of the answer the caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Free-form text.
    Text,
    /// A single JSON object.
    JsonObject,
}

impl ResponseFormat {
    /// Wire name of the hint.
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseFormat::Text => "text",
            ResponseFormat::JsonObject => "json_object",
        }
    }
}

/// Backend-agnostic chat request.
///
/// Treated as a value: the tool loop builds a new request per round with
/// [`ChatRequest::with_messages`] instead of mutating the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier understood by the selected backend.
    pub model: String,
    /// Ordered conversation history.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Answer shape hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    /// Backend-specific fields merged at the top level of the payload.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    /// Creates a request for `model` with the given history.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
            response_format: None,
            extra: Map::new(),
        }
    }

    /// Sets the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the generated token bound.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the response format hint.
    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Adds a backend-specific top-level field.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Returns a copy of this request carrying `messages` instead.
    pub fn with_messages(&self, messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..self.clone()
        }
    }

    /// Checks the invariants every backend relies on.
    pub fn validate(&self) -> LlmResult<()> {
        if self.model.trim().is_empty() {
            return Err(LlmError::InvalidRequest("model must not be empty".into()));
        }
        if let Some(pos) = self.messages.iter().position(|m| !m.has_tool_correlation()) {
            return Err(LlmError::InvalidRequest(format!(
                "tool message at index {pos} has neither tool_call_id nor tool_name"
            )));
        }
        Ok(())
    }

    /// Canonical outbound payload: model, messages, optional sampling fields,
    /// then `extra` merged on top.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("model".into(), Value::from(self.model.as_str()));
        payload.insert(
            "messages".into(),
            Value::Array(self.messages.iter().map(Message::to_wire).collect()),
        );
        if let Some(t) = self.temperature {
            payload.insert("temperature".into(), Value::from(t));
        }
        if let Some(m) = self.max_tokens {
            payload.insert("max_tokens".into(), Value::from(m));
        }
        if let Some(f) = self.response_format {
            payload.insert("response_format".into(), Value::from(f.as_str()));
        }
        for (k, v) in &self.extra {
            payload.insert(k.clone(), v.clone());
        }
        payload
    }
}
