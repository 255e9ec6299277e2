use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage as reported by the backend. Any count may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt (input) tokens.
    pub prompt_tokens: Option<u64>,
    /// Completion (output) tokens.
    pub completion_tokens: Option<u64>,
    /// Total tokens, when the backend reports it.
    pub total_tokens: Option<u64>,
}

impl Usage {
    /// Creates a usage record from raw counts.
    pub fn new(prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> Self {
        Self {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
        }
    }

    /// Alias for [`Usage::prompt_tokens`].
    pub fn input_tokens(&self) -> Option<u64> {
        self.prompt_tokens
    }

    /// Alias for [`Usage::completion_tokens`].
    pub fn output_tokens(&self) -> Option<u64> {
        self.completion_tokens
    }

    /// Reported total, or the sum of both parts when only those are known.
    pub fn total(&self) -> Option<u64> {
        self.total_tokens.or(match (self.prompt_tokens, self.completion_tokens) {
            (Some(p), Some(c)) => p.checked_add(c),
            _ => None,
        })
    }
}

/// Normalized result of one blocking round trip.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatResult {
    /// Final assistant text.
    pub text: String,
    /// Normalized token usage.
    pub usage: Usage,
    /// Tool calls requested by the model, in backend order.
    pub tool_calls: Vec<ToolCall>,
    /// Raw backend payload, kept for inspection only.
    pub raw: Value,
    /// Structured payload when schema-constrained decoding was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<Value>,
}

impl ChatResult {
    /// Creates a text-only result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Whether the model asked for any tool.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
