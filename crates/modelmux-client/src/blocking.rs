//! Blocking facade over [`LlmClient`].
//!
//! Every network call occupies the calling thread. Retries back off with
//! [`RetryPolicy::run_blocking`] and the tool loop is the same [`ToolLoop`]
//! the async client drives.
//!
//! Do not use these types from inside an async runtime; they own a
//! current-thread runtime of their own and block on it.

use crate::backends::{Backend, EventStream};
use crate::client::LlmClient;
use crate::retry::RetryPolicy;
use crate::tool_loop::{ChatOptions, ToolLoop};
use futures_util::StreamExt;
use modelmux_core::{ChatRequest, ChatResult, LlmError, LlmResult, StreamEvent};
use modelmux_tools::ToolSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};

/// Blocking twin of [`LlmClient`] with the same retry and tool-loop behavior.
pub struct BlockingClient {
    inner: LlmClient,
    runtime: Runtime,
}

impl BlockingClient {
    /// Creates a client owning `backend`.
    pub fn new(backend: impl Backend + 'static) -> LlmResult<Self> {
        Self::from_client(LlmClient::new(backend))
    }

    /// Creates a client over a shared backend.
    pub fn from_backend(backend: Arc<dyn Backend>) -> LlmResult<Self> {
        Self::from_client(LlmClient::from_backend(backend))
    }

    /// Wraps an existing async client, keeping its timeout and retry policy.
    pub fn from_client(inner: LlmClient) -> LlmResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LlmError::Config(format!("failed to start runtime: {e}")))?;
        Ok(Self { inner, runtime })
    }

    /// See [`LlmClient::with_timeout`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.inner = self.inner.with_timeout(timeout);
        self
    }

    /// See [`LlmClient::with_retry`].
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.inner = self.inner.with_retry(retry);
        self
    }

    /// The wrapped async client.
    pub fn client(&self) -> &LlmClient {
        &self.inner
    }

    fn chat_with_retry(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<ChatResult> {
        self.inner
            .retry_policy()
            .run_blocking(|| self.runtime.block_on(self.inner.chat_once(request, tools)))
    }

    /// Blocking counterpart of [`LlmClient::chat`].
    pub fn chat(
        &self,
        request: &ChatRequest,
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> LlmResult<ChatResult> {
        request.validate()?;
        let mut result = self.chat_with_retry(request, tools)?;

        let mut tool_loop = ToolLoop::new(request.clone(), tools, *options);
        while let Some(next) = self.runtime.block_on(tool_loop.advance(&result))? {
            result = self.chat_with_retry(&next, tools)?;
        }
        Ok(result)
    }

    /// Blocking counterpart of [`LlmClient::stream`].
    pub fn stream(
        &self,
        request: &ChatRequest,
        tools: &[ToolSpec],
    ) -> LlmResult<BlockingEventStream<'_>> {
        let events = self.runtime.block_on(self.inner.stream(request, tools))?;
        Ok(BlockingEventStream {
            runtime: &self.runtime,
            events,
        })
    }
}

/// Iterator over the events of one stream. Dropping it closes the connection.
pub struct BlockingEventStream<'a> {
    runtime: &'a Runtime,
    events: EventStream,
}

impl Iterator for BlockingEventStream<'_> {
    type Item = StreamEvent;

    fn next(&mut self) -> Option<StreamEvent> {
        self.runtime.block_on(self.events.next())
    }
}
