use crate::backends::EventStream;
use crate::blocking::{BlockingClient, BlockingEventStream};
use crate::client::LlmClient;
use crate::config::ClientConfig;
use crate::registry::BackendRegistry;
use crate::tool_loop::ChatOptions;
use modelmux_core::{ChatRequest, ChatResult, LlmError, LlmResult, Message, ResponseFormat};
use modelmux_tools::ToolSpec;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Per-call defaults shared by [`Model`] and [`BlockingModel`].
#[derive(Debug, Clone)]
struct Defaults {
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    tools: Vec<ToolSpec>,
    options: ChatOptions,
}

impl Defaults {
    fn new(model: String) -> Self {
        Self {
            model,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
            options: ChatOptions::default(),
        }
    }

    fn request(&self, messages: Vec<Message>) -> ChatRequest {
        let mut req = ChatRequest::new(self.model.clone(), messages);
        req.temperature = self.temperature;
        req.max_tokens = self.max_tokens;
        req
    }

    fn prompt(&self, prompt: &str) -> ChatRequest {
        self.request(vec![Message::user(prompt)])
    }

    fn json_request(&self, prompt: &str, schema: &Value) -> ChatRequest {
        let instruction = format!(
            "Return ONLY valid JSON (no markdown). Match this JSON Schema exactly: {schema}"
        );
        self.request(vec![Message::system(instruction), Message::user(prompt)])
            .with_response_format(ResponseFormat::JsonObject)
    }
}

fn attach_parsed(mut result: ChatResult) -> LlmResult<ChatResult> {
    let parsed: Value = serde_json::from_str(result.text.trim())
        .map_err(|e| LlmError::Parse(format!("Failed to parse JSON: {e}")))?;
    result.parsed = Some(parsed);
    Ok(result)
}

fn coerce<T: DeserializeOwned>(result: ChatResult) -> LlmResult<T> {
    let parsed = result.parsed.unwrap_or_default();
    serde_json::from_value(parsed)
        .map_err(|e| LlmError::Parse(format!("answer does not match the expected shape: {e}")))
}

fn client_from_config(
    config: &ClientConfig,
    registry: &BackendRegistry,
) -> LlmResult<(LlmClient, Defaults)> {
    let (backend, model) = registry.resolve(&config.model, &config.backend)?;
    let mut client = LlmClient::from_backend(backend).with_retry(config.retry_policy());
    if let Some(timeout) = config.timeout() {
        client = client.with_timeout(timeout);
    }

    let mut defaults = Defaults::new(model);
    defaults.temperature = config.temperature;
    defaults.max_tokens = config.max_tokens;
    defaults.options = config.chat_options();
    Ok((client, defaults))
}

/// Prompt-in, result-out convenience over [`LlmClient`].
///
/// Holds the model name, sampling defaults and the tool set, so each call
/// only needs the prompt.
#[derive(Debug, Clone)]
pub struct Model {
    client: LlmClient,
    defaults: Defaults,
}

impl Model {
    /// Wraps `client`, sending every request to `model`.
    pub fn new(client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            defaults: Defaults::new(model.into()),
        }
    }

    /// Resolves the backend for `config.model` through `registry` and applies
    /// the configured timeout, retry policy and tool options.
    pub fn from_config(config: &ClientConfig, registry: &BackendRegistry) -> LlmResult<Self> {
        let (client, defaults) = client_from_config(config, registry)?;
        Ok(Self { client, defaults })
    }

    /// Sampling temperature for every call.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.defaults.temperature = Some(temperature);
        self
    }

    /// Output token cap for every call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.defaults.max_tokens = Some(max_tokens);
        self
    }

    /// Tools offered to the model on every call.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.defaults.tools = tools;
        self
    }

    /// Tool-loop options for every call.
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.defaults.options = options;
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    /// Bare model name sent to the backend.
    pub fn model_name(&self) -> &str {
        &self.defaults.model
    }

    /// Blocking twin with the same client settings and defaults.
    pub fn into_blocking(self) -> LlmResult<BlockingModel> {
        Ok(BlockingModel {
            client: BlockingClient::from_client(self.client)?,
            defaults: self.defaults,
        })
    }

    /// Sends a single user prompt.
    pub async fn ask(&self, prompt: &str) -> LlmResult<ChatResult> {
        let d = &self.defaults;
        self.client.chat(&d.prompt(prompt), &d.tools, &d.options).await
    }

    /// Streams the answer to a single user prompt.
    pub async fn stream(&self, prompt: &str) -> LlmResult<EventStream> {
        let d = &self.defaults;
        self.client.stream(&d.prompt(prompt), &d.tools).await
    }

    /// Asks for a JSON answer matching `schema` and stores the parsed value
    /// in [`ChatResult::parsed`]. An answer that is not valid JSON is a
    /// [`LlmError::Parse`].
    pub async fn json(&self, prompt: &str, schema: &Value) -> LlmResult<ChatResult> {
        let d = &self.defaults;
        let req = d.json_request(prompt, schema);
        attach_parsed(self.client.chat(&req, &d.tools, &d.options).await?)
    }

    /// Like [`Model::json`], then deserializes the answer into `T`.
    pub async fn json_as<T: DeserializeOwned>(&self, prompt: &str, schema: &Value) -> LlmResult<T> {
        coerce(self.json(prompt, schema).await?)
    }
}

/// Blocking counterpart of [`Model`], built on [`BlockingClient`].
///
/// Like the blocking client it owns a runtime; do not use it from async code.
pub struct BlockingModel {
    client: BlockingClient,
    defaults: Defaults,
}

impl BlockingModel {
    /// Wraps `client`, sending every request to `model`.
    pub fn new(client: BlockingClient, model: impl Into<String>) -> Self {
        Self {
            client,
            defaults: Defaults::new(model.into()),
        }
    }

    /// Same resolution as [`Model::from_config`].
    pub fn from_config(config: &ClientConfig, registry: &BackendRegistry) -> LlmResult<Self> {
        let (client, defaults) = client_from_config(config, registry)?;
        Ok(Self {
            client: BlockingClient::from_client(client)?,
            defaults,
        })
    }

    /// Sampling temperature for every call.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.defaults.temperature = Some(temperature);
        self
    }

    /// Output token cap for every call.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.defaults.max_tokens = Some(max_tokens);
        self
    }

    /// Tools offered to the model on every call.
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.defaults.tools = tools;
        self
    }

    /// Tool-loop options for every call.
    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.defaults.options = options;
        self
    }

    /// The underlying client.
    pub fn client(&self) -> &BlockingClient {
        &self.client
    }

    /// Bare model name sent to the backend.
    pub fn model_name(&self) -> &str {
        &self.defaults.model
    }

    /// Sends a single user prompt.
    pub fn ask(&self, prompt: &str) -> LlmResult<ChatResult> {
        let d = &self.defaults;
        self.client.chat(&d.prompt(prompt), &d.tools, &d.options)
    }

    /// Streams the answer to a single user prompt.
    pub fn stream(&self, prompt: &str) -> LlmResult<BlockingEventStream<'_>> {
        let d = &self.defaults;
        self.client.stream(&d.prompt(prompt), &d.tools)
    }

    /// Blocking counterpart of [`Model::json`].
    pub fn json(&self, prompt: &str, schema: &Value) -> LlmResult<ChatResult> {
        let d = &self.defaults;
        let req = d.json_request(prompt, schema);
        attach_parsed(self.client.chat(&req, &d.tools, &d.options)?)
    }

    /// Blocking counterpart of [`Model::json_as`].
    pub fn json_as<T: DeserializeOwned>(&self, prompt: &str, schema: &Value) -> LlmResult<T> {
        coerce(self.json(prompt, schema)?)
    }
}

impl std::fmt::Debug for BlockingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingModel")
            .field("client", self.client.client())
            .field("defaults", &self.defaults)
            .finish()
    }
}
