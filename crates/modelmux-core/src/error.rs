use std::time::Duration;
use thiserror::Error;

/// A convenience `Result` alias using [`LlmError`].
pub type LlmResult<T> = Result<T, LlmError>;

/// Error taxonomy shared by every backend and by the orchestration layer.
///
/// All payloads are plain strings so the error can be cloned into a
/// [`StreamEvent::Error`](crate::StreamEvent::Error) without losing its kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Missing or rejected credentials (HTTP 401/403). Never retried.
    #[error("Authentication failed: {body}")]
    Auth {
        /// HTTP status, absent when the credential was missing locally.
        status: Option<u16>,
        /// Raw response body or local explanation.
        body: String,
    },

    /// The backend throttled the request (HTTP 429).
    #[error("Rate limited: {body}")]
    RateLimit {
        /// Raw response body.
        body: String,
    },

    /// Any other backend-reported failure.
    #[error("Provider error {status}: {body}")]
    Provider {
        /// HTTP status of the failing response.
        status: u16,
        /// Raw response body or in-band error payload.
        body: String,
    },

    /// Malformed JSON in a frame, a response body or a structured answer.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A registered tool failed while executing.
    #[error(transparent)]
    Tool(#[from] ToolExecutionError),

    /// Connection-level failure while talking to the backend.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single attempt exceeded the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The backend does not implement the requested capability.
    #[error("Backend '{backend}' does not support {capability}")]
    Unsupported {
        /// Backend name.
        backend: String,
        /// Capability that was requested, e.g. `"stream"`.
        capability: &'static str,
    },

    /// No backend registered under the requested name.
    #[error("Unknown backend '{name}'. Available: {available:?}")]
    UnknownBackend {
        /// Name that was looked up.
        name: String,
        /// Names currently registered.
        available: Vec<String>,
    },

    /// The request violates an invariant of the canonical data model.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration could not be parsed or is incomplete.
    #[error("Config error: {0}")]
    Config(String),
}

impl LlmError {
    /// Maps an HTTP error status and body onto the canonical taxonomy.
    ///
    /// Callers only invoke this for statuses >= 400.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Auth {
                status: Some(status),
                body,
            },
            429 => Self::RateLimit { body },
            _ => Self::Provider { status, body },
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth { status, .. } => *status,
            Self::RateLimit { .. } => Some(429),
            Self::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Failure raised by a tool's own code, caught at the executor boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Tool '{tool}' failed: {cause}")]
pub struct ToolExecutionError {
    /// Name of the tool that failed.
    pub tool: String,
    /// Rendered underlying cause.
    pub cause: String,
}

impl ToolExecutionError {
    /// Creates a new tool execution error.
    pub fn new(tool: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            cause: cause.into(),
        }
    }
}
