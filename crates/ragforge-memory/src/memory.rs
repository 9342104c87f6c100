use async_trait::async_trait;
use ragforge_core::{RagError, RagResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::config::MetricType;
use crate::driver::{
    CollectionInfo, CollectionSchema, Column, ColumnData, FieldType, IndexParams, SearchRequest,
    SearchResultSet, VectorDriver,
};
use crate::filter::Filter;

#[derive(Debug, Clone)]
enum Cell {
    Str(String),
    Int(i64),
    Vector(Vec<f32>),
    Json(serde_json::Value),
}

type Row = HashMap<String, Cell>;

struct StoredCollection {
    schema: CollectionSchema,
    index: Option<IndexParams>,
    loaded: bool,
    rows: Vec<Row>,
    /// Inserted but not yet searchable.
    pending: Vec<Row>,
}

/// In-memory vector database using brute-force scoring.
///
/// Suitable for tests and small single-process deployments. With
/// [`InMemoryDriver::with_deferred_visibility`] inserted rows only become
/// searchable after a flush, like a real engine's consistency point.
pub struct InMemoryDriver {
    collections: RwLock<HashMap<String, StoredCollection>>,
    deferred_visibility: bool,
    failing_inserts: AtomicUsize,
    insert_calls: AtomicUsize,
    flush_calls: AtomicUsize,
}

impl InMemoryDriver {
    /// Rows are searchable as soon as they are inserted.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            deferred_visibility: false,
            failing_inserts: AtomicUsize::new(0),
            insert_calls: AtomicUsize::new(0),
            flush_calls: AtomicUsize::new(0),
        }
    }

    /// Rows become searchable only after [`VectorDriver::flush`].
    pub fn with_deferred_visibility() -> Self {
        Self {
            deferred_visibility: true,
            ..Self::new()
        }
    }

    /// Makes the next `n` insert calls fail with a transient error.
    pub fn fail_next_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    /// Number of insert calls received, failed ones included.
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    /// Number of flush calls received.
    pub fn flush_calls(&self) -> usize {
        self.flush_calls.load(Ordering::SeqCst)
    }

    /// Rows stored in a collection, searchable or not.
    pub async fn row_count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.rows.len() + c.pending.len())
            .unwrap_or(0)
    }

    /// Schema of a collection, if it exists.
    pub async fn schema(&self, collection: &str) -> Option<CollectionSchema> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|c| c.schema.clone())
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(name: &str) -> RagError {
    RagError::NotFound(format!("collection {name} does not exist"))
}

fn cell_text(row: &Row, field: &str) -> Option<String> {
    match row.get(field)? {
        Cell::Str(s) => Some(s.clone()),
        Cell::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = inner_product(a, b);
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn columns_to_rows(schema: &CollectionSchema, columns: Vec<Column>) -> RagResult<Vec<Row>> {
    let row_count = columns.first().map(|c| c.data.len()).unwrap_or(0);
    let mut rows: Vec<Row> = (0..row_count).map(|_| HashMap::new()).collect();

    for column in columns {
        let field = schema
            .fields
            .iter()
            .find(|f| f.name == column.name)
            .ok_or_else(|| RagError::Validation(format!("unknown field {}", column.name)))?;
        if column.data.len() != row_count {
            return Err(RagError::Validation(format!(
                "column {} has {} rows, expected {row_count}",
                column.name,
                column.data.len()
            )));
        }
        let mismatch = || {
            RagError::Validation(format!(
                "column {} has type {}, schema says {:?}",
                column.name,
                column.data.type_name(),
                field.data_type
            ))
        };
        let cells: Vec<Cell> = match (&field.data_type, &column.data) {
            (FieldType::VarChar { max_length }, ColumnData::VarChar(values)) => {
                if let Some(long) = values.iter().find(|v| v.chars().count() > *max_length) {
                    return Err(RagError::Validation(format!(
                        "value of {} exceeds max_length {max_length} ({} chars)",
                        column.name,
                        long.chars().count()
                    )));
                }
                values.iter().cloned().map(Cell::Str).collect()
            }
            (FieldType::Int32, ColumnData::Int32(values)) => {
                values.iter().map(|v| Cell::Int(i64::from(*v))).collect()
            }
            (FieldType::FloatVector { dim }, ColumnData::FloatVector(values)) => {
                if let Some(bad) = values.iter().find(|v| v.len() != *dim) {
                    return Err(RagError::Validation(format!(
                        "vector of dimension {} inserted into {dim}-dimensional field {}",
                        bad.len(),
                        column.name
                    )));
                }
                values.iter().cloned().map(Cell::Vector).collect()
            }
            (FieldType::Json, ColumnData::Json(values)) => {
                values.iter().cloned().map(Cell::Json).collect()
            }
            _ => return Err(mismatch()),
        };
        for (row, cell) in rows.iter_mut().zip(cells) {
            row.insert(column.name.clone(), cell);
        }
    }

    for field in &schema.fields {
        if field.data_type != FieldType::Json && row_count > 0 && !rows[0].contains_key(&field.name)
        {
            return Err(RagError::Validation(format!("missing column {}", field.name)));
        }
    }
    Ok(rows)
}

fn rows_to_columns(
    schema: &CollectionSchema,
    rows: &[&Row],
    output_fields: &[String],
) -> RagResult<Vec<Column>> {
    let mut columns = Vec::with_capacity(output_fields.len());
    for name in output_fields {
        let field = schema
            .fields
            .iter()
            .find(|f| &f.name == name)
            .ok_or_else(|| RagError::Validation(format!("unknown output field {name}")))?;
        let data = match field.data_type {
            FieldType::VarChar { .. } => ColumnData::VarChar(
                rows.iter()
                    .map(|r| match r.get(name) {
                        Some(Cell::Str(s)) => s.clone(),
                        _ => String::new(),
                    })
                    .collect(),
            ),
            FieldType::Int32 => ColumnData::Int32(
                rows.iter()
                    .map(|r| match r.get(name) {
                        Some(Cell::Int(i)) => *i as i32,
                        _ => 0,
                    })
                    .collect(),
            ),
            FieldType::FloatVector { .. } => ColumnData::FloatVector(
                rows.iter()
                    .map(|r| match r.get(name) {
                        Some(Cell::Vector(v)) => v.clone(),
                        _ => Vec::new(),
                    })
                    .collect(),
            ),
            FieldType::Json => ColumnData::Json(
                rows.iter()
                    .map(|r| match r.get(name) {
                        Some(Cell::Json(v)) => v.clone(),
                        _ => serde_json::Value::Null,
                    })
                    .collect(),
            ),
        };
        columns.push(Column::new(name.clone(), data));
    }
    Ok(columns)
}

#[async_trait]
impl VectorDriver for InMemoryDriver {
    async fn has_collection(&self, name: &str) -> RagResult<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn describe_collection(&self, name: &str) -> RagResult<Option<CollectionInfo>> {
        let collections = self.collections.read().await;
        Ok(collections.get(name).map(|c| CollectionInfo {
            name: name.to_string(),
            dimension: c.schema.dimension(),
            loaded: c.loaded,
        }))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(&schema.name) {
            return Err(RagError::AlreadyExists(format!(
                "collection {} already exists",
                schema.name
            )));
        }
        collections.insert(
            schema.name.clone(),
            StoredCollection {
                schema: schema.clone(),
                index: None,
                loaded: false,
                rows: Vec::new(),
                pending: Vec::new(),
            },
        );
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexParams) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        if !stored.schema.fields.iter().any(|f| f.name == index.field) {
            return Err(RagError::Validation(format!(
                "cannot index unknown field {}",
                index.field
            )));
        }
        stored.index = Some(index.clone());
        Ok(())
    }

    async fn load_collection(&self, name: &str) -> RagResult<()> {
        let mut collections = self.collections.write().await;
        let stored = collections.get_mut(name).ok_or_else(|| missing(name))?;
        if stored.index.is_none() {
            return Err(RagError::VectorStore(format!(
                "collection {name} has no index and cannot be loaded"
            )));
        }
        stored.loaded = true;
        Ok(())
    }

    async fn insert(&self, collection: &str, columns: Vec<Column>) -> RagResult<usize> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(RagError::VectorStore("insert rejected: node unavailable".into()));
        }

        let mut collections = self.collections.write().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        let rows = columns_to_rows(&stored.schema, columns)?;
        let count = rows.len();
        if self.deferred_visibility {
            stored.pending.extend(rows);
        } else {
            stored.rows.extend(rows);
        }
        Ok(count)
    }

    async fn delete(&self, collection: &str, filter: &str) -> RagResult<()> {
        let filter = Filter::parse(filter)?;
        let mut collections = self.collections.write().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        stored
            .rows
            .retain(|row| !filter.matches(|field| cell_text(row, field)));
        stored
            .pending
            .retain(|row| !filter.matches(|field| cell_text(row, field)));
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> RagResult<Vec<SearchResultSet>> {
        let filter = Filter::parse(&request.filter)?;
        let collections = self.collections.read().await;
        let stored = collections
            .get(&request.collection)
            .ok_or_else(|| missing(&request.collection))?;
        if !stored.loaded {
            return Err(RagError::VectorStore(format!(
                "collection {} not loaded",
                request.collection
            )));
        }
        if let Some(dim) = stored.schema.dimension() {
            if request.vector.len() != dim {
                return Err(RagError::Validation(format!(
                    "query vector has dimension {}, collection expects {dim}",
                    request.vector.len()
                )));
            }
        }

        let mut scored: Vec<(f32, &Row)> = stored
            .rows
            .iter()
            .filter(|row| filter.matches(|field| cell_text(row, field)))
            .filter_map(|row| match row.get(&request.vector_field) {
                Some(Cell::Vector(v)) => {
                    let raw = match request.metric {
                        MetricType::Cosine => cosine_similarity(&request.vector, v),
                        MetricType::Ip => inner_product(&request.vector, v),
                        MetricType::L2 => squared_l2(&request.vector, v),
                    };
                    Some((raw, row))
                }
                _ => None,
            })
            .collect();

        // L2 is a distance, the others are similarities.
        scored.sort_by(|a, b| {
            let ord = a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal);
            if request.metric == MetricType::L2 {
                ord
            } else {
                ord.reverse()
            }
        });
        scored.truncate(request.limit);

        let rows: Vec<&Row> = scored.iter().map(|(_, row)| *row).collect();
        let columns = rows_to_columns(&stored.schema, &rows, &request.output_fields)?;
        Ok(vec![SearchResultSet {
            columns,
            scores: scored.iter().map(|(score, _)| *score).collect(),
        }])
    }

    async fn flush(&self, collection: &str) -> RagResult<()> {
        self.flush_calls.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.write().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        let pending = std::mem::take(&mut stored.pending);
        stored.rows.extend(pending);
        Ok(())
    }
}
