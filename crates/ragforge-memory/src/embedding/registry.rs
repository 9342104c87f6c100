use ragforge_core::{ModelKind, ModelRecord, RagError, RagResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{EmbeddingProvider, LocalEmbedding, OllamaEmbedding, OpenAiEmbedding};

/// Options shared by every provider built through the registry.
#[derive(Debug, Clone)]
pub struct EmbeddingOptions {
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Builds a provider for one model record.
pub type EmbeddingFactory = Arc<
    dyn Fn(&ModelRecord, &EmbeddingOptions) -> RagResult<Arc<dyn EmbeddingProvider>> + Send + Sync,
>;

/// Maps a provider name (`ModelRecord::provider`) to its factory.
///
/// Built once at startup and shared; lookups never mutate it.
#[derive(Clone)]
pub struct EmbeddingRegistry {
    factories: HashMap<String, EmbeddingFactory>,
    options: EmbeddingOptions,
}

impl EmbeddingRegistry {
    /// An empty registry.
    pub fn new(options: EmbeddingOptions) -> Self {
        Self {
            factories: HashMap::new(),
            options,
        }
    }

    /// A registry with the `openai`, `ollama` and `local` providers.
    pub fn with_defaults(options: EmbeddingOptions) -> Self {
        let mut registry = Self::new(options);
        registry.register("openai", Arc::new(openai_factory));
        registry.register("ollama", Arc::new(ollama_factory));
        registry.register("local", Arc::new(local_factory));
        registry
    }

    /// Adds or replaces a provider factory.
    pub fn register(&mut self, provider: impl Into<String>, factory: EmbeddingFactory) {
        self.factories.insert(provider.into(), factory);
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a provider handle for an embedding model record.
    pub fn build(&self, record: &ModelRecord) -> RagResult<Arc<dyn EmbeddingProvider>> {
        if record.kind != ModelKind::Embedding {
            return Err(RagError::Config(format!(
                "model {} is not an embedding model",
                record.id
            )));
        }
        if record.provider.is_empty() {
            return Err(RagError::Config(format!(
                "model {} has no provider",
                record.id
            )));
        }
        let factory = self.factories.get(&record.provider).ok_or_else(|| {
            RagError::Config(format!(
                "unsupported embedding provider: {}",
                record.provider
            ))
        })?;
        factory(record, &self.options)
    }
}

fn openai_factory(
    record: &ModelRecord,
    options: &EmbeddingOptions,
) -> RagResult<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(OpenAiEmbedding::from_record(record, options)?))
}

fn ollama_factory(
    record: &ModelRecord,
    options: &EmbeddingOptions,
) -> RagResult<Arc<dyn EmbeddingProvider>> {
    Ok(Arc::new(OllamaEmbedding::from_record(record, options)?))
}

fn local_factory(
    record: &ModelRecord,
    _: &EmbeddingOptions,
) -> RagResult<Arc<dyn EmbeddingProvider>> {
    if record.dimension == 0 {
        return Err(RagError::Config(format!(
            "model {} needs a positive dimension",
            record.id
        )));
    }
    Ok(Arc::new(LocalEmbedding::new(record.dimension)))
}

/// Validates the fields every remote provider needs.
pub(crate) fn validate_record(record: &ModelRecord) -> RagResult<()> {
    if record.base_url.is_empty() {
        return Err(RagError::Config(format!(
            "{} base URL cannot be empty",
            record.provider
        )));
    }
    reqwest::Url::parse(&record.base_url).map_err(|e| {
        RagError::Config(format!("invalid {} base URL: {e}", record.provider))
    })?;
    if record.model_name.is_empty() {
        return Err(RagError::Config(format!(
            "{} model name cannot be empty",
            record.provider
        )));
    }
    if record.dimension == 0 {
        return Err(RagError::Config(format!(
            "{} embedding dimension must be positive",
            record.provider
        )));
    }
    Ok(())
}
