use crate::error::LlmError;
use crate::tool::ToolCall;

/// Events emitted during a streaming response, normalized across backends.
///
/// Text deltas arrive in emission order. A tool call is only emitted once its
/// argument text is complete. Every stream ends with exactly one terminal
/// event: [`StreamEvent::Done`] or [`StreamEvent::Error`].
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of assistant text.
    TextDelta {
        /// The new text.
        text: String,
    },

    /// A fully accumulated tool call.
    ToolCall {
        /// The call.
        call: ToolCall,
    },

    /// The stream finished successfully.
    Done,

    /// The stream failed; no further events follow.
    Error {
        /// What went wrong.
        error: LlmError,
    },
}

impl StreamEvent {
    /// Shorthand for a [`StreamEvent::TextDelta`].
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Whether this event closes the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
