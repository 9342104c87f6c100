use crate::backends::{LlmBackend, OpenAiBackend};
use crate::config::LlmSettings;
use ragforge_core::{ModelRecord, RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Name the model calls the tool by.
    pub name: String,
    /// What the tool does, shown to the model.
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters_schema: serde_json::Value,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed with the result.
    pub id: String,
    /// Tool to run.
    pub name: String,
    /// Arguments object.
    pub arguments: serde_json::Value,
}

/// Response of a non-streaming chat call.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmResponse {
    /// Final answer.
    Done(String),
    /// The model wants tools run before it answers.
    ToolUse {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
}

/// Builds a backend for one set of chat settings.
pub type LlmFactory = Arc<dyn Fn(&LlmSettings) -> RagResult<Arc<dyn LlmBackend>> + Send + Sync>;

/// Maps a provider name to its backend factory.
#[derive(Clone, Default)]
pub struct LlmRegistry {
    factories: HashMap<String, LlmFactory>,
}

impl LlmRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `openai` and `ollama`, both served through the OpenAI-compatible API.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("openai", Arc::new(openai_factory));
        registry.register("ollama", Arc::new(openai_factory));
        registry
    }

    /// Adds or replaces a provider factory.
    pub fn register(&mut self, provider: impl Into<String>, factory: LlmFactory) {
        self.factories.insert(provider.into(), factory);
    }

    /// A backend for `settings`; unknown providers are a `Config` error.
    pub fn build(&self, settings: &LlmSettings) -> RagResult<Arc<dyn LlmBackend>> {
        let factory = self.factories.get(&settings.provider).ok_or_else(|| {
            RagError::Config(format!("unsupported LLM provider: {}", settings.provider))
        })?;
        factory(settings)
    }

    /// A backend for a user-registered chat model.
    pub fn build_for_record(&self, record: &ModelRecord) -> RagResult<Arc<dyn LlmBackend>> {
        self.build(&LlmSettings::from_record(record)?)
    }
}

fn openai_factory(settings: &LlmSettings) -> RagResult<Arc<dyn LlmBackend>> {
    Ok(Arc::new(OpenAiBackend::new(settings.clone())?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let registry = LlmRegistry::with_defaults();
        let settings = LlmSettings {
            provider: "claude-cli".into(),
            model: "m".into(),
            ..LlmSettings::default()
        };
        let err = registry.build(&settings).err().unwrap();
        assert!(matches!(err, RagError::Config(_)));
    }

    #[test]
    fn test_ollama_builds() {
        let registry = LlmRegistry::with_defaults();
        let settings = LlmSettings {
            provider: "ollama".into(),
            model: "llama3".into(),
            ..LlmSettings::default()
        };
        assert!(registry.build(&settings).is_ok());
    }
}
