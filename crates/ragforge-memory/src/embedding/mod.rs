use async_trait::async_trait;
use ragforge_core::{RagError, RagResult};
use std::collections::HashMap;

mod ollama;
mod openai;
mod registry;

pub use ollama::OllamaEmbedding;
pub use openai::OpenAiEmbedding;
pub use registry::{EmbeddingFactory, EmbeddingOptions, EmbeddingRegistry};

/// Trait for computing text embeddings (vector representations).
///
/// One instance is bound to one model; its dimension is fixed at construction
/// and can be queried before any collection is created.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds each text, returning one vector per input in input order.
    async fn embed_strings(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>>;

    /// Embeds a single text.
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        let mut vectors = self.embed_strings(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::Embedding("provider returned no vector".into()))
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Checks a provider response against the request and the bound dimension.
pub(crate) fn check_vectors(
    model: &str,
    expected_rows: usize,
    dimension: usize,
    vectors: &[Vec<f32>],
) -> RagResult<()> {
    if vectors.len() != expected_rows {
        return Err(RagError::Embedding(format!(
            "{model} returned {} vectors for {expected_rows} inputs",
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(RagError::Embedding(format!(
            "{model} returned a {}-dimensional vector, model is configured for {dimension}",
            bad.len()
        )));
    }
    Ok(())
}

/// Local bag-of-words embedding (no external API needed).
///
/// Hashes words to a fixed number of buckets and L2-normalizes. Deterministic,
/// which makes it the provider of choice for tests and offline ingestion.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    /// Creates a provider producing `dimension`-sized vectors.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> RagResult<Vec<f32>> {
        if text.is_empty() {
            return Err(RagError::Embedding("Cannot embed empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 1)
            .collect();

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for word in &words {
            *freq.entry(word).or_insert(0.0) += 1.0;
        }

        let total = words.len() as f32;
        if total == 0.0 {
            return Ok(vector);
        }

        // Three hash positions per word spread collisions.
        for (word, count) in &freq {
            let tf = count / total;
            let h1 = fnv1a(word.as_bytes()) as usize;
            let h2 = fnv1a(&[word.as_bytes(), &[1u8]].concat()) as usize;
            let h3 = fnv1a(&[word.as_bytes(), &[2u8]].concat()) as usize;

            vector[h1 % self.dimension] += tf;
            vector[h2 % self.dimension] += tf * 0.7;
            vector[h3 % self.dimension] += tf * 0.5;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed_strings(&self, texts: &[String]) -> RagResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(data: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
