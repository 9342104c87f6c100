use ragforge_core::{Chunk, RagError, RagResult};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{VectorStoreConfig, DOCUMENT_NAME_MAX};
use crate::driver::{
    CollectionSchema, Column, ColumnData, FieldSchema, FieldType, IndexParams, SearchRequest,
    SearchResultSet, VectorDriver,
};
use crate::filter::Filter;
use crate::ranking::sort_by_score;

/// Primary key field.
pub const FIELD_ID: &str = "id";
/// Chunk text field.
pub const FIELD_CONTENT: &str = "content";
/// Owning document field.
pub const FIELD_DOCUMENT_ID: &str = "document_id";
/// Document display name field.
pub const FIELD_DOCUMENT_NAME: &str = "document_name";
/// Owning knowledge base field.
pub const FIELD_KB_ID: &str = "kb_id";
/// Ordinal field.
pub const FIELD_CHUNK_INDEX: &str = "chunk_index";
/// Embedding field.
pub const FIELD_VECTOR: &str = "vector";
/// Optional JSON metadata field.
pub const FIELD_METADATA: &str = "metadata";

/// Side effects requested from [`VectorStoreEngine::write_chunks_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Flush after the insert so the rows are immediately searchable.
    pub flush: bool,
}

/// Owns the chunk collection schema and all reads and writes of chunk rows.
///
/// The engine holds no per-collection state; the vector database is the
/// only source of truth and concurrent writers to one collection are fine.
pub struct VectorStoreEngine {
    driver: Arc<dyn VectorDriver>,
    config: VectorStoreConfig,
}

impl VectorStoreEngine {
    /// Creates an engine over a shared driver handle.
    pub fn new(driver: Arc<dyn VectorDriver>, config: VectorStoreConfig) -> Self {
        Self { driver, config }
    }

    /// Engine configuration.
    pub fn config(&self) -> &VectorStoreConfig {
        &self.config
    }

    /// Schema of a chunk collection with vectors of `dimension`.
    pub fn schema(&self, collection: &str, dimension: usize) -> CollectionSchema {
        let limits = &self.config.limits;
        let mut fields = vec![
            FieldSchema::new(FIELD_ID, FieldType::VarChar { max_length: limits.id }).primary(),
            FieldSchema::new(
                FIELD_CONTENT,
                FieldType::VarChar {
                    max_length: limits.content,
                },
            ),
            FieldSchema::new(
                FIELD_DOCUMENT_ID,
                FieldType::VarChar {
                    max_length: limits.document_id,
                },
            ),
            FieldSchema::new(
                FIELD_DOCUMENT_NAME,
                FieldType::VarChar {
                    max_length: limits.document_name,
                },
            ),
            FieldSchema::new(
                FIELD_KB_ID,
                FieldType::VarChar {
                    max_length: limits.kb_id,
                },
            ),
            FieldSchema::new(FIELD_CHUNK_INDEX, FieldType::Int32),
            FieldSchema::new(FIELD_VECTOR, FieldType::FloatVector { dim: dimension }),
        ];
        if self.config.with_metadata {
            fields.push(FieldSchema::new(FIELD_METADATA, FieldType::Json));
        }
        CollectionSchema {
            name: collection.to_string(),
            description: "Knowledge base document chunks".to_string(),
            fields,
        }
    }

    /// Creates, indexes and loads the collection unless it already exists.
    ///
    /// An existing collection whose reported dimension differs from
    /// `dimension` is rejected instead of silently reused.
    pub async fn ensure_collection(&self, collection: &str, dimension: usize) -> RagResult<()> {
        if dimension == 0 {
            return Err(RagError::Validation(format!(
                "collection {collection} needs a positive dimension"
            )));
        }
        let ctx = |e: RagError| e.context("VectorStore.ensure_collection");

        if let Some(existing) = self.driver.describe_collection(collection).await.map_err(ctx)? {
            return match existing.dimension {
                Some(dim) if dim != dimension => Err(RagError::Validation(format!(
                    "collection {collection} stores {dim}-dimensional vectors, \
                     embedding model produces {dimension}"
                ))),
                _ => Ok(()),
            };
        }

        match self
            .driver
            .create_collection(&self.schema(collection, dimension))
            .await
        {
            Ok(()) => {}
            Err(RagError::AlreadyExists(_)) => {
                debug!(collection, "Collection created concurrently");
                return Ok(());
            }
            Err(e) => return Err(ctx(e)),
        }

        let index = &self.config.index;
        self.driver
            .create_index(
                collection,
                &IndexParams {
                    field: FIELD_VECTOR.to_string(),
                    kind: index.kind,
                    metric: index.metric,
                    params: index.build_params(),
                },
            )
            .await
            .map_err(ctx)?;
        self.driver.load_collection(collection).await.map_err(ctx)?;

        info!(
            collection,
            dimension,
            index = index.kind.as_milvus(),
            metric = index.metric.as_milvus(),
            "Created vector collection"
        );
        Ok(())
    }

    /// Writes chunks without an explicit flush.
    pub async fn write_chunks(&self, collection: &str, chunks: Vec<Chunk>) -> RagResult<usize> {
        self.write_chunks_with(collection, chunks, WriteOptions::default())
            .await
    }

    /// Writes chunks in one column-batched insert, retrying transient failures.
    ///
    /// Chunks with empty content or an empty embedding are skipped; if none
    /// remain the call fails. Returns the number of rows written.
    pub async fn write_chunks_with(
        &self,
        collection: &str,
        chunks: Vec<Chunk>,
        options: WriteOptions,
    ) -> RagResult<usize> {
        let ctx = |e: RagError| e.context("VectorStore.write_chunks");
        let columns = self.prepare_columns(chunks).map_err(ctx)?;

        let written = self
            .config
            .retry
            .run("vector insert", || self.driver.insert(collection, columns.clone()))
            .await
            .map_err(ctx)?;

        if options.flush {
            self.driver.flush(collection).await.map_err(ctx)?;
        }
        debug!(collection, rows = written, flush = options.flush, "Chunks written");
        Ok(written)
    }

    fn prepare_columns(&self, chunks: Vec<Chunk>) -> RagResult<Vec<Column>> {
        let total = chunks.len();
        let valid: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| {
                let ok = !c.content.is_empty() && !c.embedding.is_empty();
                if !ok {
                    warn!(
                        chunk_id = %c.id,
                        document_id = %c.document_id,
                        index = c.index,
                        empty_content = c.content.is_empty(),
                        empty_embedding = c.embedding.is_empty(),
                        "Skipping invalid chunk"
                    );
                }
                ok
            })
            .collect();
        if valid.is_empty() {
            return Err(RagError::Validation(format!(
                "no valid chunks ({total} submitted)"
            )));
        }

        let dimension = valid[0].embedding.len();
        let limits = &self.config.limits;
        for c in &valid {
            if c.embedding.len() != dimension {
                return Err(RagError::Validation(format!(
                    "chunk {} has dimension {}, batch has {dimension}",
                    c.id,
                    c.embedding.len()
                )));
            }
            check_len(FIELD_ID, &c.id, limits.id)?;
            check_len(FIELD_CONTENT, &c.content, limits.content)?;
            check_len(FIELD_DOCUMENT_ID, &c.document_id, limits.document_id)?;
            check_len(FIELD_KB_ID, &c.kb_id, limits.kb_id)?;
        }

        let rows = valid.len();
        let mut ids = Vec::with_capacity(rows);
        let mut contents = Vec::with_capacity(rows);
        let mut document_ids = Vec::with_capacity(rows);
        let mut document_names = Vec::with_capacity(rows);
        let mut kb_ids = Vec::with_capacity(rows);
        let mut indexes = Vec::with_capacity(rows);
        let mut vectors = Vec::with_capacity(rows);
        let mut metadata = Vec::with_capacity(rows);
        for c in valid {
            ids.push(c.id);
            contents.push(c.content);
            document_ids.push(c.document_id);
            document_names.push(truncate_name(&c.document_name));
            kb_ids.push(c.kb_id);
            indexes.push(c.index);
            vectors.push(c.embedding);
            metadata.push(c.metadata.unwrap_or(serde_json::Value::Null));
        }

        let mut columns = vec![
            Column::new(FIELD_ID, ColumnData::VarChar(ids)),
            Column::new(FIELD_CONTENT, ColumnData::VarChar(contents)),
            Column::new(FIELD_DOCUMENT_ID, ColumnData::VarChar(document_ids)),
            Column::new(FIELD_DOCUMENT_NAME, ColumnData::VarChar(document_names)),
            Column::new(FIELD_KB_ID, ColumnData::VarChar(kb_ids)),
            Column::new(FIELD_CHUNK_INDEX, ColumnData::Int32(indexes)),
            Column::new(FIELD_VECTOR, ColumnData::FloatVector(vectors)),
        ];
        if self.config.with_metadata {
            columns.push(Column::new(FIELD_METADATA, ColumnData::Json(metadata)));
        }
        Ok(columns)
    }

    /// Deletes every row of the given documents.
    ///
    /// An empty id set, or a collection that was never created, is a no-op.
    pub async fn delete_chunks(&self, collection: &str, document_ids: &[String]) -> RagResult<()> {
        let ctx = |e: RagError| e.context("VectorStore.delete_chunks");
        if document_ids.is_empty() {
            return Ok(());
        }
        if !self.driver.has_collection(collection).await.map_err(ctx)? {
            debug!(collection, "Collection absent, nothing to delete");
            return Ok(());
        }
        let expr = Filter::any_of(FIELD_DOCUMENT_ID, document_ids).to_expr();
        self.driver
            .delete(collection, &expr)
            .await
            .map_err(ctx)?;
        info!(collection, documents = document_ids.len(), "Deleted document chunks");
        Ok(())
    }

    /// Filtered similarity search returning at most `top_k` chunks, best first.
    pub async fn search(
        &self,
        collection: &str,
        kb_ids: &[String],
        vector: &[f32],
        top_k: usize,
    ) -> RagResult<Vec<Chunk>> {
        let ctx = |e: RagError| e.context("VectorStore.search");
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if vector.is_empty() {
            return Err(ctx(RagError::Validation("empty query vector".into())));
        }

        match self.driver.describe_collection(collection).await.map_err(ctx)? {
            None => {
                return Err(ctx(RagError::NotFound(format!(
                    "collection {collection} does not exist"
                ))))
            }
            Some(info) if !info.loaded => {
                self.driver.load_collection(collection).await.map_err(ctx)?;
            }
            Some(_) => {}
        }

        let request = SearchRequest {
            collection: collection.to_string(),
            vector_field: FIELD_VECTOR.to_string(),
            vector: vector.to_vec(),
            filter: Filter::any_of(FIELD_KB_ID, kb_ids).to_expr(),
            limit: top_k,
            output_fields: self.output_fields(),
            json_fields: if self.config.with_metadata {
                vec![FIELD_METADATA.to_string()]
            } else {
                Vec::new()
            },
            metric: self.config.index.metric,
            params: self.config.index.search_params(),
        };
        let sets = self.driver.search(&request).await.map_err(ctx)?;

        let mut chunks = Vec::new();
        for set in sets {
            chunks.extend(self.decode(set).map_err(ctx)?);
        }
        sort_by_score(&mut chunks);
        chunks.truncate(top_k);
        Ok(chunks)
    }

    fn output_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = [
            FIELD_ID,
            FIELD_CONTENT,
            FIELD_DOCUMENT_ID,
            FIELD_DOCUMENT_NAME,
            FIELD_KB_ID,
            FIELD_CHUNK_INDEX,
        ]
        .iter()
        .map(|f| f.to_string())
        .collect();
        if self.config.with_metadata {
            fields.push(FIELD_METADATA.to_string());
        }
        fields
    }

    /// Decodes one result set. Any missing or mistyped column fails the call.
    fn decode(&self, set: SearchResultSet) -> RagResult<Vec<Chunk>> {
        let rows = set.scores.len();
        if rows == 0 {
            return Ok(Vec::new());
        }
        let mut columns = set.columns;
        let mut take = |name: &str| -> RagResult<ColumnData> {
            let pos = columns
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| RagError::VectorStore(format!("result is missing column {name}")))?;
            let column = columns.swap_remove(pos);
            if column.data.len() != rows {
                return Err(RagError::VectorStore(format!(
                    "column {name} has {} rows, result has {rows}",
                    column.data.len()
                )));
            }
            Ok(column.data)
        };

        let ids = strings(FIELD_ID, take(FIELD_ID)?)?;
        let contents = strings(FIELD_CONTENT, take(FIELD_CONTENT)?)?;
        let document_ids = strings(FIELD_DOCUMENT_ID, take(FIELD_DOCUMENT_ID)?)?;
        let document_names = strings(FIELD_DOCUMENT_NAME, take(FIELD_DOCUMENT_NAME)?)?;
        let kb_ids = strings(FIELD_KB_ID, take(FIELD_KB_ID)?)?;
        let indexes = integers(FIELD_CHUNK_INDEX, take(FIELD_CHUNK_INDEX)?)?;
        let metadata: Vec<Option<serde_json::Value>> = if self.config.with_metadata {
            match take(FIELD_METADATA)? {
                ColumnData::Json(values) => values
                    .into_iter()
                    .map(|v| (!v.is_null()).then_some(v))
                    .collect(),
                other => return Err(type_error(FIELD_METADATA, "JSON", &other)),
            }
        } else {
            vec![None; rows]
        };

        let metric = self.config.index.metric;
        let chunks = ids
            .into_iter()
            .zip(contents)
            .zip(document_ids)
            .zip(document_names)
            .zip(kb_ids)
            .zip(indexes)
            .zip(metadata)
            .zip(set.scores)
            .map(
                |(((((((id, content), document_id), document_name), kb_id), index), meta), raw)| {
                    Chunk {
                        id,
                        content,
                        kb_id,
                        document_id,
                        document_name,
                        index,
                        embedding: Vec::new(),
                        score: Some(metric.to_score(raw)),
                        metadata: meta,
                    }
                },
            )
            .collect();
        Ok(chunks)
    }
}

fn check_len(field: &str, value: &str, max: usize) -> RagResult<()> {
    let len = value.chars().count();
    if len > max {
        return Err(RagError::Validation(format!(
            "{field} is {len} characters, limit is {max}"
        )));
    }
    Ok(())
}

fn truncate_name(name: &str) -> String {
    name.chars().take(DOCUMENT_NAME_MAX).collect()
}

fn type_error(field: &str, expected: &str, got: &ColumnData) -> RagError {
    RagError::VectorStore(format!(
        "column {field} has type {}, expected {expected}",
        got.type_name()
    ))
}

fn strings(field: &str, data: ColumnData) -> RagResult<Vec<String>> {
    match data {
        ColumnData::VarChar(values) => Ok(values),
        other => Err(type_error(field, "VarChar", &other)),
    }
}

fn integers(field: &str, data: ColumnData) -> RagResult<Vec<i32>> {
    match data {
        ColumnData::Int32(values) => Ok(values),
        ColumnData::Int64(values) => values
            .into_iter()
            .map(|v| {
                i32::try_from(v).map_err(|_| {
                    RagError::VectorStore(format!("column {field} value {v} overflows Int32"))
                })
            })
            .collect(),
        other => Err(type_error(field, "Int32", &other)),
    }
}
