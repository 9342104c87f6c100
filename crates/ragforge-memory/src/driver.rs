use async_trait::async_trait;
use ragforge_core::RagResult;
use serde::{Deserialize, Serialize};

use crate::config::{IndexKind, MetricType};

/// Scalar or vector type of a collection field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Bounded UTF-8 string.
    VarChar {
        /// Maximum length in characters.
        max_length: usize,
    },
    /// 32-bit integer.
    Int32,
    /// Dense float vector.
    FloatVector {
        /// Vector dimension.
        dim: usize,
    },
    /// Free-form JSON.
    Json,
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field type.
    pub data_type: FieldType,
    /// Whether this field is the primary key.
    pub primary: bool,
}

impl FieldSchema {
    /// A non-primary field.
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary: false,
        }
    }

    /// Marks the field as the primary key.
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// Schema of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Fields, primary key first.
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Dimension of the first vector field.
    pub fn dimension(&self) -> Option<usize> {
        self.fields.iter().find_map(|f| match f.data_type {
            FieldType::FloatVector { dim } => Some(dim),
            _ => None,
        })
    }
}

/// Vector index to build on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Indexed vector field.
    pub field: String,
    /// Index family.
    pub kind: IndexKind,
    /// Distance metric.
    pub metric: MetricType,
    /// Family-specific build parameters.
    pub params: serde_json::Value,
}

/// Values of one column, one entry per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// String values.
    VarChar(Vec<String>),
    /// 32-bit integers.
    Int32(Vec<i32>),
    /// 64-bit integers.
    Int64(Vec<i64>),
    /// Floating point values.
    Float(Vec<f64>),
    /// Dense vectors.
    FloatVector(Vec<Vec<f32>>),
    /// JSON documents.
    Json(Vec<serde_json::Value>),
}

impl ColumnData {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::VarChar(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::FloatVector(v) => v.len(),
            ColumnData::Json(v) => v.len(),
        }
    }

    /// Whether the column holds no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnData::VarChar(_) => "VarChar",
            ColumnData::Int32(_) => "Int32",
            ColumnData::Int64(_) => "Int64",
            ColumnData::Float(_) => "Float",
            ColumnData::FloatVector(_) => "FloatVector",
            ColumnData::Json(_) => "JSON",
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Field name.
    pub name: String,
    /// Row values.
    pub data: ColumnData,
}

impl Column {
    /// Creates a column.
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// A similarity search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Target collection.
    pub collection: String,
    /// Vector field searched.
    pub vector_field: String,
    /// Query vector.
    pub vector: Vec<f32>,
    /// Filter expression applied before ranking.
    pub filter: String,
    /// Maximum rows returned.
    pub limit: usize,
    /// Scalar fields returned with each hit.
    pub output_fields: Vec<String>,
    /// Output fields stored as JSON. Drivers that see hits as untyped JSON
    /// decode these as [`ColumnData::Json`] whatever shape the value has.
    #[serde(default)]
    pub json_fields: Vec<String>,
    /// Metric the collection was indexed with.
    pub metric: MetricType,
    /// Search-time parameters (probe or candidate count).
    pub params: serde_json::Value,
}

/// Hits of one search, column-oriented.
///
/// `scores[i]` is the raw metric value of row `i`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchResultSet {
    /// Output field columns.
    pub columns: Vec<Column>,
    /// Raw metric value per row.
    pub scores: Vec<f32>,
}

/// State of an existing collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Vector dimension, when the database reports one.
    pub dimension: Option<usize>,
    /// Whether the collection is loaded into the serving tier.
    pub loaded: bool,
}

/// Calls the vector store engine needs from a vector database.
#[async_trait]
pub trait VectorDriver: Send + Sync {
    /// Whether a collection with this name exists.
    async fn has_collection(&self, name: &str) -> RagResult<bool>;

    /// Describes a collection, `None` if it does not exist.
    async fn describe_collection(&self, name: &str) -> RagResult<Option<CollectionInfo>>;

    /// Creates a collection. Fails with `AlreadyExists` if the name is taken.
    async fn create_collection(&self, schema: &CollectionSchema) -> RagResult<()>;

    /// Builds a vector index.
    async fn create_index(&self, collection: &str, index: &IndexParams) -> RagResult<()>;

    /// Loads a collection into the serving tier.
    async fn load_collection(&self, name: &str) -> RagResult<()>;

    /// Inserts rows given column-wise; every column has the same length.
    async fn insert(&self, collection: &str, columns: Vec<Column>) -> RagResult<usize>;

    /// Deletes every row matching a filter expression.
    async fn delete(&self, collection: &str, filter: &str) -> RagResult<()>;

    /// Runs a filtered similarity search.
    async fn search(&self, request: &SearchRequest) -> RagResult<Vec<SearchResultSet>>;

    /// Makes previous inserts visible to search.
    async fn flush(&self, collection: &str) -> RagResult<()>;
}
