use modelmux_core::{ChatRequest, ChatResult, LlmError, LlmResult, Message, ToolCall};
use modelmux_tools::{ToolRegistry, ToolSpec};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

/// Whether the client runs requested tools itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRuntime {
    /// Tool calls are returned to the caller untouched.
    #[default]
    #[serde(alias = "none")]
    Manual,
    /// Matching tools are executed and their results fed back to the model.
    Auto,
}

/// What the loop does when a tool's own code fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Send `{"error": "..."}` back to the model as the tool's result.
    #[default]
    FeedBack,
    /// Stop the loop and return [`LlmError::Tool`].
    Abort,
}

/// Per-call options for [`LlmClient::chat`](crate::LlmClient::chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Whether tools run automatically.
    pub tool_runtime: ToolRuntime,
    /// Upper bound on tool rounds.
    pub max_steps: u32,
    /// What a failing tool does to the loop.
    pub on_tool_error: ToolErrorPolicy,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            tool_runtime: ToolRuntime::Manual,
            max_steps: 6,
            on_tool_error: ToolErrorPolicy::FeedBack,
        }
    }
}

impl ChatOptions {
    /// Defaults with automatic tool execution turned on.
    pub fn auto() -> Self {
        Self::default().with_tool_runtime(ToolRuntime::Auto)
    }

    /// Sets the tool runtime.
    pub fn with_tool_runtime(mut self, runtime: ToolRuntime) -> Self {
        self.tool_runtime = runtime;
        self
    }

    /// Sets the round bound.
    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Sets the tool error policy.
    pub fn with_tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.on_tool_error = policy;
        self
    }
}

/// Control flow of the tool loop, shared by the async and blocking clients.
///
/// The caller performs the model calls; the loop decides whether another
/// round is due, runs the matching tools and builds the next request:
///
/// ```text
/// let mut result = call(&request)?;
/// let mut tool_loop = ToolLoop::new(request, tools, options);
/// while let Some(next) = tool_loop.advance(&result).await? {
///     result = call(&next)?;
/// }
/// ```
pub struct ToolLoop {
    request: ChatRequest,
    tools: ToolRegistry,
    options: ChatOptions,
    steps: u32,
}

impl ToolLoop {
    /// Starts a loop for `request`, which already got its first answer.
    pub fn new(request: ChatRequest, tools: &[ToolSpec], options: ChatOptions) -> Self {
        Self {
            request,
            tools: ToolRegistry::from_specs(tools),
            options,
            steps: 0,
        }
    }

    /// Rounds executed so far.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// The request of the latest round.
    pub fn request(&self) -> &ChatRequest {
        &self.request
    }

    /// Runs the tools `result` asked for and returns the request for the next
    /// round, or `None` when `result` is final.
    ///
    /// A result is final when tool execution is manual, no tools were given,
    /// it carries no tool call, or `max_steps` rounds already ran. Reaching
    /// the bound is not an error. Calls naming an unregistered tool are
    /// skipped, but the round still counts and the model is asked again.
    pub async fn advance(&mut self, result: &ChatResult) -> LlmResult<Option<ChatRequest>> {
        if self.options.tool_runtime != ToolRuntime::Auto
            || self.tools.is_empty()
            || !result.has_tool_calls()
        {
            return Ok(None);
        }
        if self.steps >= self.options.max_steps {
            warn!(max_steps = self.options.max_steps, "Tool loop reached max steps");
            return Ok(None);
        }

        let (matched, skipped): (Vec<&ToolCall>, Vec<&ToolCall>) = result
            .tool_calls
            .iter()
            .partition(|call| self.tools.get(&call.name).is_some());
        for call in &skipped {
            warn!(tool = %call.name, "No tool registered under this name, skipping call");
        }

        self.steps += 1;
        info!(step = self.steps, calls = matched.len(), "Tool loop round");

        // A round where nothing matched re-asks with the history unchanged.
        let mut messages = self.request.messages.clone();
        if !matched.is_empty() {
            messages.push(Message::assistant_with_tool_calls(
                result.text.clone(),
                matched.iter().map(|c| (*c).clone()).collect(),
            ));
        }

        for call in matched {
            info!(tool = %call.name, call_id = %call.id, "Executing tool call");
            let content = match self.tools.execute(call).await {
                Some(Ok(value)) => value.to_string(),
                Some(Err(e)) => match self.options.on_tool_error {
                    ToolErrorPolicy::Abort => return Err(LlmError::Tool(e)),
                    ToolErrorPolicy::FeedBack => {
                        error!(error = %e, tool = %call.name, "Tool execution failed");
                        json!({ "error": e.to_string() }).to_string()
                    }
                },
                None => continue,
            };
            messages.push(Message::tool(
                content,
                Some(call.correlation_id().to_string()),
                Some(call.name.clone()),
            ));
        }

        self.request = self.request.with_messages(messages);
        Ok(Some(self.request.clone()))
    }
}
