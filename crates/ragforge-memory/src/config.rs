use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Maximum stored length of a chunk's document name, in characters.
pub const DOCUMENT_NAME_MAX: usize = 250;

/// Cluster count used by inverted-file indexes when none is configured.
pub const DEFAULT_NLIST: u32 = 128;

/// Distance metric of a collection's vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Cosine similarity, higher is closer.
    #[default]
    Cosine,
    /// Euclidean distance, lower is closer.
    L2,
    /// Inner product, higher is closer.
    Ip,
}

impl MetricType {
    /// Name the vector database uses for this metric.
    pub fn as_milvus(&self) -> &'static str {
        match self {
            MetricType::Cosine => "COSINE",
            MetricType::L2 => "L2",
            MetricType::Ip => "IP",
        }
    }

    /// Maps a raw metric value to a score where higher always means closer.
    ///
    /// L2 distances become `1 / (1 + d)`; the similarity metrics pass through.
    pub fn to_score(&self, raw: f32) -> f32 {
        match self {
            MetricType::L2 => 1.0 / (1.0 + raw.max(0.0)),
            MetricType::Cosine | MetricType::Ip => raw,
        }
    }
}

/// Index family built over the vector field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Flat inverted file.
    #[default]
    IvfFlat,
    /// Scalar-quantized inverted file.
    IvfSq8,
    /// Graph-based index.
    Hnsw,
}

impl IndexKind {
    /// Name the vector database uses for this index family.
    pub fn as_milvus(&self) -> &'static str {
        match self {
            IndexKind::IvfFlat => "IVF_FLAT",
            IndexKind::IvfSq8 => "IVF_SQ8",
            IndexKind::Hnsw => "HNSW",
        }
    }
}

/// Index build and search-time parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index family.
    #[serde(default)]
    pub kind: IndexKind,
    /// Distance metric.
    #[serde(default)]
    pub metric: MetricType,
    /// Cluster count for inverted-file indexes; 128 when unset.
    #[serde(default)]
    pub nlist: Option<u32>,
    /// Graph fan-out for HNSW.
    #[serde(default = "default_m")]
    pub m: u32,
    /// Construction candidate width for HNSW.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: u32,
    /// Clusters probed per search on inverted-file indexes.
    #[serde(default = "default_nprobe")]
    pub nprobe: u32,
    /// Candidate list size per search on HNSW.
    #[serde(default = "default_ef")]
    pub ef: u32,
}

fn default_m() -> u32 {
    16
}

fn default_ef_construction() -> u32 {
    200
}

fn default_nprobe() -> u32 {
    16
}

fn default_ef() -> u32 {
    64
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: IndexKind::default(),
            metric: MetricType::default(),
            nlist: None,
            m: default_m(),
            ef_construction: default_ef_construction(),
            nprobe: default_nprobe(),
            ef: default_ef(),
        }
    }
}

impl IndexConfig {
    /// Build parameters for the configured index family.
    pub fn build_params(&self) -> serde_json::Value {
        match self.kind {
            IndexKind::IvfFlat | IndexKind::IvfSq8 => {
                serde_json::json!({ "nlist": self.nlist.unwrap_or(DEFAULT_NLIST) })
            }
            IndexKind::Hnsw => {
                serde_json::json!({ "M": self.m, "efConstruction": self.ef_construction })
            }
        }
    }

    /// Search-time parameters for the configured index family.
    pub fn search_params(&self) -> serde_json::Value {
        match self.kind {
            IndexKind::IvfFlat | IndexKind::IvfSq8 => serde_json::json!({ "nprobe": self.nprobe }),
            IndexKind::Hnsw => serde_json::json!({ "ef": self.ef }),
        }
    }
}

/// Maximum lengths of the collection's string fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLimits {
    /// Chunk id.
    #[serde(default = "default_id_len")]
    pub id: usize,
    /// Chunk text.
    #[serde(default = "default_content_len")]
    pub content: usize,
    /// Owning document id.
    #[serde(default = "default_id_len")]
    pub document_id: usize,
    /// Owning document name.
    #[serde(default = "default_document_name_len")]
    pub document_name: usize,
    /// Owning knowledge base id.
    #[serde(default = "default_id_len")]
    pub kb_id: usize,
}

fn default_id_len() -> usize {
    64
}

fn default_content_len() -> usize {
    65_535
}

fn default_document_name_len() -> usize {
    256
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            id: default_id_len(),
            content: default_content_len(),
            document_id: default_id_len(),
            document_name: default_document_name_len(),
            kb_id: default_id_len(),
        }
    }
}

/// Configuration of the [`VectorStoreEngine`](crate::VectorStoreEngine).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// Index family, metric and parameters.
    #[serde(default)]
    pub index: IndexConfig,
    /// String field lengths of newly created collections.
    #[serde(default)]
    pub limits: FieldLimits,
    /// Insert retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Whether new collections carry the optional JSON `metadata` field.
    #[serde(default)]
    pub with_metadata: bool,
}
