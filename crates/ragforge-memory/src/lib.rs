//! Vector storage and embeddings for retrieval-augmented generation.
//!
//! Provides the vector database driver seam (in-memory and Milvus REST
//! implementations), the [`VectorStoreEngine`] that owns collection schema,
//! retried batched writes, filtered similarity search and strict row
//! decoding, chunk ranking, and the embedding providers with their registry.
//!
//! # Main types
//!
//! - [`VectorDriver`]: Trait over the vector database's collection, index and entity calls.
//! - [`InMemoryDriver`]: Brute-force driver for tests and single-process deployments.
//! - [`MilvusRestDriver`]: Driver speaking the Milvus RESTful v2 API.
//! - [`VectorStoreEngine`]: Collection lifecycle, chunk writes, deletes and search.
//! - [`EmbeddingProvider`]: Trait for turning text into vectors.
//! - [`EmbeddingRegistry`]: Provider name to factory map, built at startup.

/// Index, metric, field limit and retry configuration.
pub mod config;
/// Vector database driver trait and columnar data types.
pub mod driver;
/// Embedding provider trait, providers and registry.
pub mod embedding;
/// The vector store engine.
pub mod engine;
/// Filter expressions over scalar fields.
pub mod filter;
/// In-memory driver.
pub mod memory;
/// Milvus RESTful v2 driver.
pub mod milvus;
/// Merging and ordering of chunk result sets.
pub mod ranking;
/// Bounded exponential-backoff retries.
pub mod retry;

pub use config::{FieldLimits, IndexConfig, IndexKind, MetricType, VectorStoreConfig};
pub use driver::{CollectionInfo, Column, ColumnData, VectorDriver};
pub use embedding::{
    EmbeddingOptions, EmbeddingProvider, EmbeddingRegistry, LocalEmbedding, OllamaEmbedding,
    OpenAiEmbedding,
};
pub use engine::{VectorStoreEngine, WriteOptions};
pub use filter::Filter;
pub use memory::InMemoryDriver;
pub use milvus::MilvusRestDriver;
pub use ranking::{rank_chunks, sort_by_score};
pub use retry::RetryPolicy;
