use async_trait::async_trait;
use ragforge_core::{ModelRecord, RagError, RagResult};
use serde::{Deserialize, Serialize};

use super::registry::{validate_record, EmbeddingOptions};
use super::{check_vectors, EmbeddingProvider};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` provider.
///
/// Works with OpenAI and any server implementing the same endpoint
/// (vLLM, LocalAI, DashScope compatible mode, ...).
pub struct OpenAiEmbedding {
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    http: reqwest::Client,
}

impl OpenAiEmbedding {
    /// Builds a provider from a registered embedding model.
    pub fn from_record(record: &ModelRecord, options: &EmbeddingOptions) -> RagResult<Self> {
        validate_record(record)?;
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| RagError::Config(format!("cannot build embedding HTTP client: {e}")))?;
        Ok(Self {
            base_url: record.base_url.trim_end_matches('/').to_string(),
            api_key: record.api_key.clone(),
            model: record.model_name.clone(),
            dimension: record.dimension,
            http,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedding {
    async fn embed_strings(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimension,
        };

        let mut req = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("embedding request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!(
                "Embedding API error {status}: {text}"
            )));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid embedding response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        check_vectors(&self.model, texts.len(), self.dimension, &vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
