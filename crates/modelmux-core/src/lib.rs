//! Core types and error definitions for modelmux.
//!
//! This crate provides the backend-agnostic shapes every adapter consumes and
//! produces, plus the shared error taxonomy.
//!
//! # Main types
//!
//! - [`LlmError`] - Unified error enum (auth, rate limit, provider, parse, tool, ...).
//! - [`LlmResult`] - Convenience alias for `Result<T, LlmError>`.
//! - [`Message`] / [`Role`] - One conversation turn.
//! - [`ChatRequest`] - Canonical request sent to any backend.
//! - [`ChatResult`] / [`Usage`] - Canonical synchronous result.
//! - [`ToolCall`] - A model-issued tool invocation.
//! - [`StreamEvent`] - One event of a normalized stream.

/// Error taxonomy.
pub mod error;
/// Conversation messages.
pub mod message;
/// Chat requests.
pub mod request;
/// Results and token usage.
pub mod response;
/// Streaming events.
pub mod stream;
/// Tool calls.
pub mod tool;

pub use error::{LlmError, LlmResult, ToolExecutionError};
pub use message::{Message, Role};
pub use request::{ChatRequest, ResponseFormat};
pub use response::{ChatResult, Usage};
pub use stream::StreamEvent;
pub use tool::ToolCall;
