use ragforge_core::{ModelKind, ModelRecord, RagError, RagResult};
use serde::{Deserialize, Serialize};

/// Connection and sampling settings for one chat model.
///
/// Comes either from the `[llm]` section of the configuration file or from a
/// user-registered LLM model record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Provider discriminator, looked up in the [`crate::LlmRegistry`].
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name sent to the provider.
    #[serde(default)]
    pub model: String,
    /// Bearer token; empty when the provider needs none.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: String::new(),
            api_key: String::new(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmSettings {
    /// Settings for a user-registered chat model.
    pub fn from_record(record: &ModelRecord) -> RagResult<Self> {
        if record.kind != ModelKind::Llm {
            return Err(RagError::Config(format!(
                "model {} is not a chat model",
                record.id
            )));
        }
        Ok(Self {
            provider: record.provider.to_lowercase(),
            model: record.model_name.clone(),
            api_key: record.api_key.clone(),
            base_url: Some(record.base_url.clone()).filter(|u| !u.is_empty()),
            max_tokens: if record.max_output_length > 0 {
                record.max_output_length
            } else {
                default_max_tokens()
            },
            ..Self::default()
        })
    }

    /// API root the chat completions path is appended to.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider.as_str() {
                "ollama" => "http://localhost:11434/v1",
                _ => "https://api.openai.com/v1",
            }
        }
    }
}

/// A configured agent: prompt, model, bound knowledge bases and loop limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    /// Id referenced by chat requests.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// System prompt of every turn.
    #[serde(default)]
    pub system_prompt: String,
    /// Registered chat model to answer with; the default `[llm]` model when unset.
    #[serde(default)]
    pub llm_model_id: Option<String>,
    /// Knowledge bases searched for grounding before every turn.
    #[serde(default)]
    pub kb_ids: Vec<String>,
    /// Chunks retrieved for grounding.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on model calls within one turn.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_top_k() -> usize {
    3
}

fn default_max_steps() -> u32 {
    10
}
