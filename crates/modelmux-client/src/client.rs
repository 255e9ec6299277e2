use crate::backends::{Backend, EventStream};
use crate::retry::RetryPolicy;
use crate::tool_loop::{ChatOptions, ToolLoop};
use modelmux_core::{ChatRequest, ChatResult, LlmError, LlmResult};
use modelmux_tools::ToolSpec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Request entry point bound to one backend.
///
/// `chat` retries each model call under the client's [`RetryPolicy`] and, when
/// asked to, runs the tool loop. `stream` is a plain passthrough: a partially
/// delivered stream is never retried.
///
/// Calls share no mutable state, so one client can serve concurrent requests.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn Backend>,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl LlmClient {
    /// Creates a client owning `backend`, with the default retry policy
    /// and no timeout.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::from_backend(Arc::new(backend))
    }

    /// Create from a shared backend (e.g. one resolved through a registry).
    pub fn from_backend(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Bounds every single attempt; the tool loop as a whole is bounded only
    /// by its round count.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The backend requests go to.
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Current per-attempt timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// One attempt, bounded by the per-attempt timeout.
    pub(crate) async fn chat_once(
        &self,
        request: &ChatRequest,
        tools: &[ToolSpec],
    ) -> LlmResult<ChatResult> {
        debug!(
            backend = self.backend.name(),
            messages = request.messages.len(),
            "Calling backend"
        );
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.chat(request, tools))
                .await
                .map_err(|_| LlmError::Timeout(limit))?,
            None => self.backend.chat(request, tools).await,
        }
    }

    async fn chat_with_retry(
        &self,
        request: &ChatRequest,
        tools: &[ToolSpec],
    ) -> LlmResult<ChatResult> {
        self.retry.run(|| self.chat_once(request, tools)).await
    }

    /// Sends `request`, running the tool loop when `options` enable it.
    ///
    /// When the loop hits `max_steps` the last result is returned as is, tool
    /// calls included.
    pub async fn chat(
        &self,
        request: &ChatRequest,
        tools: &[ToolSpec],
        options: &ChatOptions,
    ) -> LlmResult<ChatResult> {
        request.validate()?;
        let mut result = self.chat_with_retry(request, tools).await?;

        let mut tool_loop = ToolLoop::new(request.clone(), tools, *options);
        while let Some(next) = tool_loop.advance(&result).await? {
            result = self.chat_with_retry(&next, tools).await?;
        }
        if tool_loop.steps() > 0 {
            info!(
                backend = self.backend.name(),
                steps = tool_loop.steps(),
                "Tool loop finished"
            );
        }
        Ok(result)
    }

    /// Opens an event stream. Only establishing the stream is bounded by
    /// the timeout; consuming it is not.
    pub async fn stream(&self, request: &ChatRequest, tools: &[ToolSpec]) -> LlmResult<EventStream> {
        request.validate()?;
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.stream(request, tools))
                .await
                .map_err(|_| LlmError::Timeout(limit))?,
            None => self.backend.stream(request, tools).await,
        }
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}
