use crate::tool::ToolCall;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system-level instruction or prompt.
    System,
    /// A human end-user.
    User,
    /// The model.
    Assistant,
    /// Output produced by a tool invocation.
    Tool,
}

impl Role {
    /// Wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single conversation turn in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// Optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Backend tool call id this message answers (tool role only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name this message answers, for backends that key results by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool calls requested in this turn (assistant role only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Arbitrary key-value metadata attached to the message.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Message {
    /// Creates a new message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_name: None,
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates the assistant turn that requested `calls`.
    pub fn assistant_with_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::assistant(content);
        msg.tool_calls = calls;
        msg
    }

    /// Creates a tool result message.
    ///
    /// At least one of `tool_call_id` or `tool_name` should be set so the
    /// backend can match the result to the call that produced it.
    pub fn tool(
        content: impl Into<String>,
        tool_call_id: Option<String>,
        tool_name: Option<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = tool_call_id;
        msg.tool_name = tool_name;
        msg
    }

    /// Sets the participant name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether a tool-role message carries an id or a name to correlate it.
    /// Always true for other roles.
    pub fn has_tool_correlation(&self) -> bool {
        if self.role != Role::Tool {
            return true;
        }
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.tool_call_id) || present(&self.tool_name)
    }

    /// Canonical, backend-agnostic JSON form. Only present optional fields
    /// are emitted.
    pub fn to_wire(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("role".into(), Value::from(self.role.as_str()));
        obj.insert("content".into(), Value::from(self.content.as_str()));
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            obj.insert("name".into(), Value::from(name));
        }
        if let Some(id) = self.tool_call_id.as_deref().filter(|v| !v.is_empty()) {
            obj.insert("tool_call_id".into(), Value::from(id));
        }
        if let Some(tool) = self.tool_name.as_deref().filter(|v| !v.is_empty()) {
            obj.insert("tool_name".into(), Value::from(tool));
        }
        if !self.metadata.is_empty() {
            let meta: Map<String, Value> = self
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            obj.insert("metadata".into(), Value::Object(meta));
        }
        Value::Object(obj)
    }
}
