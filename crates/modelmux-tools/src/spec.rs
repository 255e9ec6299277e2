use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Boxed error returned by tool handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Tool arguments as handed over by the model.
pub type ToolArgs = Map<String, Value>;

/// The executable behind a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool with the model-supplied arguments.
    async fn call(&self, args: ToolArgs) -> Result<Value, BoxError>;
}

/// Adapter that turns a synchronous closure into a [`ToolHandler`].
pub struct FnTool<F> {
    f: F,
}

impl<F> FnTool<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, T, E> ToolHandler for FnTool<F>
where
    F: Fn(ToolArgs) -> Result<T, E> + Send + Sync,
    T: Serialize,
    E: Into<BoxError>,
{
    async fn call(&self, args: ToolArgs) -> Result<Value, BoxError> {
        let out = (self.f)(args).map_err(Into::into)?;
        Ok(serde_json::to_value(out)?)
    }
}

/// Description of one tool plus the behaviour that implements it.
///
/// `name` is the join key between a model-issued tool call and this spec, so
/// it must be unique within the tool set of one request.
#[derive(Clone)]
pub struct ToolSpec {
    /// Stable tool name.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON-Schema object describing the arguments.
    pub parameters: Value,
    handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    /// Creates a spec backed by an arbitrary handler.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        }
    }

    /// Creates a spec backed by a synchronous closure.
    pub fn from_fn<F, T, E>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        f: F,
    ) -> Self
    where
        F: Fn(ToolArgs) -> Result<T, E> + Send + Sync + 'static,
        T: Serialize + 'static,
        E: Into<BoxError> + 'static,
    {
        Self::new(name, description, parameters, FnTool::new(f))
    }

    /// The handler that executes this tool.
    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}
