//! One chat/stream contract over several language-model backends.
//!
//! [`LlmClient`] (async) and [`BlockingClient`] wrap a [`Backend`] with a
//! [`RetryPolicy`] and, optionally, the tool loop that runs model-requested
//! tools and feeds their results back. Backends are picked through an
//! explicit [`BackendRegistry`]; [`Model`] bundles it all behind a
//! prompt-in, result-out API.

pub mod backends;
pub mod blocking;
/// The async [`LlmClient`].
pub mod client;
/// TOML configuration and per-backend connection settings.
pub mod config;
/// [`Model`] and [`BlockingModel`], the prompt-level facades.
pub mod model;
/// Provider-name to backend resolution.
pub mod registry;
/// Exponential backoff around single model calls.
pub mod retry;
/// The tool loop shared by both clients.
pub mod tool_loop;
pub mod wire;

pub use backends::{AnthropicBackend, Backend, EventStream, OllamaBackend, OpenAiBackend};
pub use blocking::{BlockingClient, BlockingEventStream};
pub use client::LlmClient;
pub use config::{BackendSettings, ClientConfig};
pub use model::{BlockingModel, Model};
pub use registry::{parse_model, BackendFactory, BackendRegistry, DEFAULT_PROVIDER};
pub use retry::RetryPolicy;
pub use tool_loop::{ChatOptions, ToolErrorPolicy, ToolLoop, ToolRuntime};

pub use modelmux_core::{
    ChatRequest, ChatResult, LlmError, LlmResult, Message, ResponseFormat, Role, StreamEvent,
    ToolCall, Usage,
};
pub use modelmux_tools::{ToolArgs, ToolSpec};
