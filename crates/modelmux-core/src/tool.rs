use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool invocation requested by the model.
///
/// Arguments are kept in two forms: the parsed object and its JSON text.
/// Streaming backends deliver the text in fragments, so the text form is the
/// one that gets accumulated; the object form is what executors receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Backend-assigned identifier. Empty for backends that key by name.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Parsed arguments.
    pub arguments: Map<String, Value>,
    /// JSON text of the arguments.
    pub arguments_json: String,
}

impl ToolCall {
    /// Builds a call from argument text as delivered on the wire.
    ///
    /// Text that is blank, invalid, or not a JSON object degrades to an empty
    /// argument map; the raw text is kept in `arguments_json` in that case.
    pub fn from_json_text(id: impl Into<String>, name: impl Into<String>, text: &str) -> Self {
        let parsed = if text.trim().is_empty() {
            Some(Map::new())
        } else {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        };

        match parsed {
            Some(arguments) => Self::from_arguments(id, name, arguments),
            None => Self {
                id: id.into(),
                name: name.into(),
                arguments: Map::new(),
                arguments_json: text.to_string(),
            },
        }
    }

    /// Builds a call from already-parsed arguments.
    pub fn from_arguments(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        let arguments_json = Value::Object(arguments.clone()).to_string();
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            arguments_json,
        }
    }

    /// Builds a call from any JSON value; non-objects become empty arguments.
    pub fn from_value(id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_arguments(id, name, map),
            Value::String(text) => Self::from_json_text(id, name, &text),
            _ => Self::from_arguments(id, name, Map::new()),
        }
    }

    /// Identifier used to correlate a tool result with this call.
    ///
    /// Falls back to the tool name when the backend did not assign an id.
    pub fn correlation_id(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}
