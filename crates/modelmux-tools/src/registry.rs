use crate::executor::execute_tool;
use crate::spec::ToolSpec;
use modelmux_core::{ToolCall, ToolExecutionError};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Name-keyed set of the tools available to one conversation.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolSpec>,
    order: Vec<String>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from a tool list. Later duplicates replace earlier ones.
    pub fn from_specs(specs: &[ToolSpec]) -> Self {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec.clone());
        }
        registry
    }

    /// Adds or replaces a tool.
    pub fn register(&mut self, spec: ToolSpec) {
        let name = spec.name.clone();
        if self.tools.insert(name.clone(), spec).is_some() {
            warn!(tool = %name, "Replacing previously registered tool");
        } else {
            debug!(tool = %name, "Registered tool");
            self.order.push(name);
        }
    }

    /// Looks a tool up by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    /// All tools, in registration order.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).cloned())
            .collect()
    }

    /// Executes `call` if a tool with its name is registered.
    ///
    /// Returns `None` for unknown names: the model may mention a tool the
    /// caller never wired up, which is not an error.
    pub async fn execute(&self, call: &ToolCall) -> Option<Result<Value, ToolExecutionError>> {
        let spec = self.tools.get(&call.name)?;
        Some(execute_tool(spec, &call.arguments).await)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tool is registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
