use crate::backends::{AnthropicBackend, Backend, OllamaBackend, OpenAiBackend};
use crate::config::BackendSettings;
use modelmux_core::{LlmError, LlmResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Provider used when a model string has no `provider:` prefix.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Splits `"<provider>:<model>"`. A bare model name uses [`DEFAULT_PROVIDER`].
///
/// Only the first `:` separates, so model names may contain colons
/// (`"ollama:llama3.1:8b"`).
pub fn parse_model(spec: &str) -> (&str, &str) {
    match spec.split_once(':') {
        Some((provider, model)) => (provider.trim(), model.trim()),
        None => (DEFAULT_PROVIDER, spec.trim()),
    }
}

/// Builds a backend from connection settings.
pub type BackendFactory = Arc<dyn Fn(&BackendSettings) -> LlmResult<Arc<dyn Backend>> + Send + Sync>;

/// Explicit table from provider name to backend factory.
///
/// Nothing is registered implicitly: start from [`BackendRegistry::new`] for
/// an empty table or [`BackendRegistry::with_defaults`] for the built-in
/// providers, then [`register`](BackendRegistry::register) your own.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `openai`, `anthropic` and `ollama`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("openai", |s| {
            Ok(Arc::new(OpenAiBackend::from_settings(s)?) as Arc<dyn Backend>)
        });
        registry.register("anthropic", |s| {
            Ok(Arc::new(AnthropicBackend::from_settings(s)?) as Arc<dyn Backend>)
        });
        registry.register("ollama", |s| {
            Ok(Arc::new(OllamaBackend::from_settings(s)?) as Arc<dyn Backend>)
        });
        registry
    }

    /// Adds or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&BackendSettings) -> LlmResult<Arc<dyn Backend>> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(backend = %name, "Registered backend factory");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Whether a factory is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Builds the backend registered under `name`.
    pub fn create(&self, name: &str, settings: &BackendSettings) -> LlmResult<Arc<dyn Backend>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| LlmError::UnknownBackend {
                name: name.to_string(),
                available: self.names(),
            })?;
        factory(settings)
    }

    /// Resolves a `"<provider>:<model>"` string to a backend and the bare
    /// model name.
    pub fn resolve(
        &self,
        model_spec: &str,
        settings: &BackendSettings,
    ) -> LlmResult<(Arc<dyn Backend>, String)> {
        let (provider, model) = parse_model(model_spec);
        if model.is_empty() {
            return Err(LlmError::Config(format!(
                "model string '{model_spec}' names no model"
            )));
        }
        let backend = self.create(provider, settings)?;
        Ok((backend, model.to_string()))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model() {
        assert_eq!(parse_model("anthropic:claude-3-5-haiku-latest"), ("anthropic", "claude-3-5-haiku-latest"));
        assert_eq!(parse_model("gpt-4o-mini"), ("openai", "gpt-4o-mini"));
        assert_eq!(parse_model(" ollama : llama3.1:8b "), ("ollama", "llama3.1:8b"));
    }

    #[test]
    fn test_defaults_are_explicit() {
        assert!(BackendRegistry::new().names().is_empty());
        assert_eq!(
            BackendRegistry::with_defaults().names(),
            vec!["anthropic", "ollama", "openai"]
        );
    }

    #[test]
    fn test_unknown_backend_lists_available() {
        let err = BackendRegistry::with_defaults()
            .create("mistral", &BackendSettings::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            LlmError::UnknownBackend {
                name: "mistral".into(),
                available: vec!["anthropic".into(), "ollama".into(), "openai".into()],
            }
        );
    }

    #[test]
    fn test_resolve_builds_backend() {
        let settings = BackendSettings::default().with_api_key("sk-test");
        let (backend, model) = BackendRegistry::with_defaults()
            .resolve("anthropic:claude-3-5-haiku-latest", &settings)
            .unwrap();
        assert_eq!(backend.name(), "anthropic");
        assert_eq!(model, "claude-3-5-haiku-latest");

        let (backend, model) = BackendRegistry::with_defaults()
            .resolve("ollama:llama3.1", &BackendSettings::default())
            .unwrap();
        assert_eq!(backend.name(), "ollama");
        assert_eq!(model, "llama3.1");
    }

    #[test]
    fn test_resolve_rejects_empty_model() {
        let err = BackendRegistry::with_defaults()
            .resolve("ollama:", &BackendSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = BackendRegistry::new();
        registry.register("local", |s| {
            Ok(Arc::new(OllamaBackend::from_settings(s)?) as Arc<dyn Backend>)
        });
        assert!(registry.contains("local"));
        let (backend, _) = registry
            .resolve("local:phi3", &BackendSettings::default())
            .unwrap();
        assert_eq!(backend.name(), "ollama");
    }
}
