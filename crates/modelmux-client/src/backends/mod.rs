//! Backend adapters and the plumbing they share.

/// Anthropic Messages API.
pub mod anthropic;
/// Ollama `/api/chat`.
pub mod ollama;
/// OpenAI-compatible chat completions.
pub mod openai;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use modelmux_core::{ChatRequest, ChatResult, LlmError, LlmResult, StreamEvent};
use modelmux_tools::ToolSpec;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// A lazily produced stream of normalized events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Trait for language-model backends.
///
/// Each backend (OpenAI-compatible, Anthropic, Ollama, ...) implements this
/// trait to translate canonical requests into its wire format and its
/// responses back into canonical results and events. No retry decision is
/// made here.
///
/// To add a new backend:
/// 1. Create a new module in `backends/`
/// 2. Implement `Backend` for your struct
/// 3. Register a factory for it in a [`BackendRegistry`](crate::BackendRegistry)
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name, e.g. `"openai"`.
    fn name(&self) -> &str;

    /// One blocking round trip.
    async fn chat(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<ChatResult>;

    /// Incremental variant of [`Backend::chat`].
    ///
    /// HTTP status failures are returned here, before any event. Failures
    /// after the first byte arrive as a terminal [`StreamEvent::Error`].
    async fn stream(&self, _request: &ChatRequest, _tools: &[ToolSpec]) -> LlmResult<EventStream> {
        Err(LlmError::Unsupported {
            backend: self.name().to_string(),
            capability: "stream",
        })
    }
}

/// Maps a non-success response onto the canonical error taxonomy.
pub(crate) async fn check_status(resp: reqwest::Response) -> LlmResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(LlmError::from_status(status.as_u16(), body))
}

/// Maps a reqwest failure: timeouts become [`LlmError::Timeout`] carrying the
/// configured limit, everything else is a transport error.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Option<Duration>) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(timeout.unwrap_or_default())
    } else {
        LlmError::Transport(err.to_string())
    }
}

/// The HTTP client of one backend and the timeout it was built with.
#[derive(Debug, Clone, Default)]
pub(crate) struct HttpTransport {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// A client whose requests, body reads included, give up after `timeout`.
    pub(crate) fn with_timeout(timeout: Duration) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout: Some(timeout),
        })
    }

    pub(crate) fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.post(url)
    }

    fn error(&self, err: reqwest::Error) -> LlmError {
        transport_error(err, self.timeout)
    }

    /// POSTs `body` as JSON and returns the status-checked response.
    pub(crate) async fn post_json(
        &self,
        request: reqwest::RequestBuilder,
        body: &Value,
    ) -> LlmResult<reqwest::Response> {
        let resp = request
            .json(body)
            .send()
            .await
            .map_err(|e| self.error(e))?;
        check_status(resp).await
    }

    /// Reads a status-checked response body as JSON.
    pub(crate) async fn read_json(&self, resp: reqwest::Response) -> LlmResult<Value> {
        let bytes = resp.bytes().await.map_err(|e| self.error(e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| LlmError::Parse(format!("invalid response body: {e}")))
    }

    /// The body of a status-checked response as a chunked byte stream.
    pub(crate) fn body_stream(
        &self,
        resp: reqwest::Response,
    ) -> impl Stream<Item = LlmResult<Vec<u8>>> + Send {
        let timeout = self.timeout;
        resp.bytes_stream()
            .map(move |chunk| chunk.map(|b| b.to_vec()).map_err(|e| transport_error(e, timeout)))
    }
}

/// Tool list in the `{"type":"function","function":{...}}` shape shared by
/// OpenAI-compatible servers and Ollama.
pub(crate) fn function_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                }
            })
        })
        .collect()
}

/// Turns decoded frames into canonical events for one stream.
pub(crate) trait FrameHandler: Send + 'static {
    type Frame: Send;

    /// Handles one frame, pushing any events it completes onto `out`.
    /// Returns `Ok(true)` once the backend signalled the end of the stream.
    fn on_frame(&mut self, frame: Self::Frame, out: &mut Vec<StreamEvent>) -> LlmResult<bool>;

    /// Flushes buffered state once no more frames will arrive.
    fn finish(&mut self, out: &mut Vec<StreamEvent>);
}

struct EventState<S, H> {
    frames: Pin<Box<S>>,
    handler: H,
    queue: VecDeque<StreamEvent>,
    closed: bool,
}

impl<S, H: FrameHandler> EventState<S, H> {
    fn close(&mut self, out: Vec<StreamEvent>, error: Option<LlmError>) {
        self.queue.extend(out);
        match error {
            Some(error) => self.queue.push_back(StreamEvent::Error { error }),
            None => {
                let mut tail = Vec::new();
                self.handler.finish(&mut tail);
                self.queue.extend(tail);
                self.queue.push_back(StreamEvent::Done);
            }
        }
        self.closed = true;
    }
}

/// Drives `handler` over `frames`, lazily.
///
/// Every stream ends with exactly one terminal event: `Done` after the
/// handler flushed its buffered tool calls, or `Error` on the first failure.
pub(crate) fn event_stream<S, H>(frames: S, handler: H) -> EventStream
where
    S: Stream<Item = LlmResult<H::Frame>> + Send + 'static,
    H: FrameHandler,
{
    let state = EventState {
        frames: Box::pin(frames),
        handler,
        queue: VecDeque::new(),
        closed: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.queue.pop_front() {
                return Some((event, st));
            }
            if st.closed {
                return None;
            }

            let mut out = Vec::new();
            match st.frames.next().await {
                Some(Ok(frame)) => match st.handler.on_frame(frame, &mut out) {
                    Ok(false) => st.queue.extend(out),
                    Ok(true) => st.close(out, None),
                    Err(e) => st.close(out, Some(e)),
                },
                Some(Err(e)) => st.close(out, Some(e)),
                None => st.close(out, None),
            }
        }
    }))
}

/// Replays a finished result as a stream: its text, its tool calls, then
/// `Done`. Backends without native incremental output use this, so the first
/// event only arrives once the whole response is ready.
pub fn replay_result(result: ChatResult) -> EventStream {
    let mut events = Vec::with_capacity(result.tool_calls.len() + 2);
    if !result.text.is_empty() {
        events.push(StreamEvent::text(result.text));
    }
    events.extend(
        result
            .tool_calls
            .into_iter()
            .map(|call| StreamEvent::ToolCall { call }),
    );
    events.push(StreamEvent::Done);
    Box::pin(stream::iter(events))
}
