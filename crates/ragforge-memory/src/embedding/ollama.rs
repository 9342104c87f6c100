use async_trait::async_trait;
use ragforge_core::{ModelRecord, RagError, RagResult};
use serde::{Deserialize, Serialize};

use super::registry::{validate_record, EmbeddingOptions};
use super::{check_vectors, EmbeddingProvider};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Ollama `/api/embed` provider.
pub struct OllamaEmbedding {
    base_url: String,
    model: String,
    dimension: usize,
    http: reqwest::Client,
}

impl OllamaEmbedding {
    /// Builds a provider from a registered embedding model.
    pub fn from_record(record: &ModelRecord, options: &EmbeddingOptions) -> RagResult<Self> {
        validate_record(record)?;
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("cannot build embedding HTTP client: {e}")))?;
        Ok(Self {
            base_url: record.base_url.trim_end_matches('/').to_string(),
            model: record.model_name.clone(),
            dimension: record.dimension,
            http,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    async fn embed_strings(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let resp = self
            .http
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("Ollama request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Ollama API error {status}: {text}"
            )));
        }
        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid Ollama response: {e}")))?;
        check_vectors(&self.model, texts.len(), self.dimension, &parsed.embeddings)?;
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
