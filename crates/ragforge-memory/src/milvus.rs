use async_trait::async_trait;
use ragforge_core::{RagError, RagResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use crate::driver::{
    CollectionInfo, CollectionSchema, Column, ColumnData, FieldSchema, FieldType, IndexParams,
    SearchRequest, SearchResultSet, VectorDriver,
};

/// Milvus driver over the RESTful v2 API (`/v2/vectordb/...`).
///
/// One instance holds a pooled HTTP client and is shared by every component.
pub struct MilvusRestDriver {
    base_url: String,
    token: Option<String>,
    database: Option<String>,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: String,
}

impl MilvusRestDriver {
    /// Creates a driver for the server at `address` (e.g. `http://localhost:19530`).
    pub fn new(address: impl Into<String>, timeout: Duration) -> RagResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Config(format!("cannot build Milvus HTTP client: {e}")))?;
        Ok(Self {
            base_url: address.into().trim_end_matches('/').to_string(),
            token: None,
            database: None,
            http,
        })
    }

    /// Authenticates with a bearer token (`user:password` or an API key).
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.is_empty()).then_some(token);
        self
    }

    /// Targets a database other than `default`.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        self.database = (!database.is_empty()).then_some(database);
        self
    }

    async fn call(&self, path: &str, mut body: Map<String, Value>) -> RagResult<Value> {
        if let Some(db) = &self.database {
            body.insert("dbName".into(), Value::String(db.clone()));
        }
        let url = format!("{}/v2/vectordb/{path}", self.base_url);
        debug!(path, "Milvus request");

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let resp = request
            .send()
            .await
            .map_err(|e| RagError::VectorStore(format!("Milvus request {path} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RagError::VectorStore(format!(
                "Milvus API error {status}: {text}"
            )));
        }
        let envelope: Envelope = resp
            .json()
            .await
            .map_err(|e| RagError::VectorStore(format!("invalid Milvus response: {e}")))?;
        if envelope.code != 0 && envelope.code != 200 {
            return Err(classify(path, envelope.code, &envelope.message));
        }
        Ok(envelope.data)
    }
}

fn classify(path: &str, code: i64, message: &str) -> RagError {
    let lower = message.to_lowercase();
    if lower.contains("already exist") {
        RagError::AlreadyExists(message.to_string())
    } else if lower.contains("not found") || lower.contains("can't find") {
        RagError::NotFound(message.to_string())
    } else {
        RagError::VectorStore(format!("Milvus {path} error {code}: {message}"))
    }
}

fn body(pairs: Vec<(&str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn field_json(field: &FieldSchema) -> Value {
    let mut out = Map::new();
    out.insert("fieldName".into(), Value::String(field.name.clone()));
    let (data_type, params) = match field.data_type {
        FieldType::VarChar { max_length } => {
            ("VarChar", Some(serde_json::json!({ "max_length": max_length })))
        }
        FieldType::Int32 => ("Int32", None),
        FieldType::FloatVector { dim } => {
            ("FloatVector", Some(serde_json::json!({ "dim": dim })))
        }
        FieldType::Json => ("JSON", None),
    };
    out.insert("dataType".into(), Value::String(data_type.into()));
    if field.primary {
        out.insert("isPrimary".into(), Value::Bool(true));
    }
    if let Some(params) = params {
        out.insert("elementTypeParams".into(), params);
    }
    Value::Object(out)
}

/// Turns columns into the row objects the REST insert expects.
fn columns_to_rows(columns: &[Column]) -> RagResult<Vec<Value>> {
    let len = columns.first().map(|c| c.data.len()).unwrap_or(0);
    let mut rows: Vec<Map<String, Value>> = (0..len).map(|_| Map::new()).collect();
    for column in columns {
        if column.data.len() != len {
            return Err(RagError::Validation(format!(
                "column {} has {} rows, expected {len}",
                column.name,
                column.data.len()
            )));
        }
        let values: Vec<Value> = match &column.data {
            ColumnData::VarChar(v) => v.iter().map(|s| Value::String(s.clone())).collect(),
            ColumnData::Int32(v) => v.iter().map(|i| Value::from(*i)).collect(),
            ColumnData::Int64(v) => v.iter().map(|i| Value::from(*i)).collect(),
            ColumnData::Float(v) => v.iter().map(|f| Value::from(*f)).collect(),
            ColumnData::FloatVector(v) => v.iter().map(|vec| Value::from(vec.clone())).collect(),
            ColumnData::Json(v) => v.clone(),
        };
        for (row, value) in rows.iter_mut().zip(values) {
            row.insert(column.name.clone(), value);
        }
    }
    Ok(rows.into_iter().map(Value::Object).collect())
}

/// Builds one typed column from the values of a field across search hits.
///
/// All hits must carry the field with the same JSON type. JSON fields are
/// kept as values whatever their shape.
fn infer_column(name: &str, values: Vec<Value>, json: bool) -> RagResult<Column> {
    if json {
        return Ok(Column::new(name, ColumnData::Json(values)));
    }
    let inconsistent = || {
        RagError::VectorStore(format!("field {name} has inconsistent types across hits"))
    };
    let data = match values.first().map(json_kind) {
        Some(JsonKind::String) => ColumnData::VarChar(
            values
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    _ => Err(inconsistent()),
                })
                .collect::<RagResult<_>>()?,
        ),
        Some(JsonKind::Integer) => ColumnData::Int64(
            values
                .iter()
                .map(|v| v.as_i64().ok_or_else(inconsistent))
                .collect::<RagResult<_>>()?,
        ),
        Some(JsonKind::Float) => ColumnData::Float(
            values
                .iter()
                .map(|v| v.as_f64().ok_or_else(inconsistent))
                .collect::<RagResult<_>>()?,
        ),
        Some(JsonKind::Array) => ColumnData::FloatVector(
            values
                .iter()
                .map(|v| {
                    v.as_array()
                        .ok_or_else(inconsistent)?
                        .iter()
                        .map(|x| x.as_f64().map(|f| f as f32).ok_or_else(inconsistent))
                        .collect::<RagResult<Vec<f32>>>()
                })
                .collect::<RagResult<_>>()?,
        ),
        Some(JsonKind::Other) | None => ColumnData::Json(values),
    };
    Ok(Column::new(name, data))
}

enum JsonKind {
    String,
    Integer,
    Float,
    Array,
    Other,
}

fn json_kind(value: &Value) -> JsonKind {
    match value {
        Value::String(_) => JsonKind::String,
        Value::Number(n) if n.is_i64() => JsonKind::Integer,
        Value::Number(_) => JsonKind::Float,
        Value::Array(_) => JsonKind::Array,
        _ => JsonKind::Other,
    }
}

fn hits_to_result_set(
    data: Value,
    output_fields: &[String],
    json_fields: &[String],
) -> RagResult<SearchResultSet> {
    let hits = match data {
        Value::Array(hits) => hits,
        Value::Null => Vec::new(),
        other => {
            return Err(RagError::VectorStore(format!(
                "search returned {other}, expected a list of hits"
            )))
        }
    };
    if hits.is_empty() {
        return Ok(SearchResultSet::default());
    }

    let mut scores = Vec::with_capacity(hits.len());
    let mut per_field: Vec<Vec<Value>> = vec![Vec::with_capacity(hits.len()); output_fields.len()];
    for hit in hits {
        let Value::Object(mut hit) = hit else {
            return Err(RagError::VectorStore("search hit is not an object".into()));
        };
        let score = hit
            .get("distance")
            .and_then(Value::as_f64)
            .ok_or_else(|| RagError::VectorStore("search hit without distance".into()))?;
        scores.push(score as f32);
        for (field, values) in output_fields.iter().zip(per_field.iter_mut()) {
            let value = hit.remove(field).ok_or_else(|| {
                RagError::VectorStore(format!("search hit missing output field {field}"))
            })?;
            values.push(value);
        }
    }

    let columns = output_fields
        .iter()
        .zip(per_field)
        .map(|(field, values)| infer_column(field, values, json_fields.contains(field)))
        .collect::<RagResult<Vec<_>>>()?;
    Ok(SearchResultSet { columns, scores })
}

#[async_trait]
impl VectorDriver for MilvusRestDriver {
    async fn has_collection(&self, name: &str) -> RagResult<bool> {
        let data = self
            .call("collections/has", body(vec![("collectionName", name.into())]))
            .await?;
        Ok(data["has"].as_bool().unwrap_or(false))
    }

    async fn describe_collection(&self, name: &str) -> RagResult<Option<CollectionInfo>> {
        if !self.has_collection(name).await? {
            return Ok(None);
        }
        let data = self
            .call(
                "collections/describe",
                body(vec![("collectionName", name.into())]),
            )
            .await?;
        let dimension = data["fields"].as_array().and_then(|fields| {
            fields
                .iter()
                .filter(|f| f["type"].as_str() == Some("FloatVector"))
                .find_map(|f| {
                    f["params"].as_array()?.iter().find_map(|p| {
                        if p["key"].as_str() != Some("dim") {
                            return None;
                        }
                        match &p["value"] {
                            Value::String(s) => s.parse().ok(),
                            v => v.as_u64().map(|d| d as usize),
                        }
                    })
                })
        });
        let load_state = match data["load"].as_str() {
            Some(state) => state.to_string(),
            None => {
                let state = self
                    .call(
                        "collections/get_load_state",
                        body(vec![("collectionName", name.into())]),
                    )
                    .await?;
                state["loadState"].as_str().unwrap_or_default().to_string()
            }
        };
        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension,
            loaded: load_state == "LoadStateLoaded",
        }))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> RagResult<()> {
        let fields: Vec<Value> = schema.fields.iter().map(field_json).collect();
        self.call(
            "collections/create",
            body(vec![
                ("collectionName", schema.name.clone().into()),
                ("description", schema.description.clone().into()),
                (
                    "schema",
                    serde_json::json!({
                        "autoId": false,
                        "enableDynamicField": false,
                        "fields": fields,
                    }),
                ),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexParams) -> RagResult<()> {
        let mut params = match &index.params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        params.insert("index_type".into(), index.kind.as_milvus().into());
        self.call(
            "indexes/create",
            body(vec![
                ("collectionName", collection.into()),
                (
                    "indexParams",
                    serde_json::json!([{
                        "fieldName": index.field,
                        "indexName": format!("{}_idx", index.field),
                        "metricType": index.metric.as_milvus(),
                        "params": params,
                    }]),
                ),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn load_collection(&self, name: &str) -> RagResult<()> {
        self.call("collections/load", body(vec![("collectionName", name.into())]))
            .await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, columns: Vec<Column>) -> RagResult<usize> {
        let rows = columns_to_rows(&columns)?;
        let expected = rows.len();
        let data = self
            .call(
                "entities/insert",
                body(vec![
                    ("collectionName", collection.into()),
                    ("data", Value::Array(rows)),
                ]),
            )
            .await?;
        Ok(data["insertCount"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(expected))
    }

    async fn delete(&self, collection: &str, filter: &str) -> RagResult<()> {
        self.call(
            "entities/delete",
            body(vec![
                ("collectionName", collection.into()),
                ("filter", filter.into()),
            ]),
        )
        .await?;
        Ok(())
    }

    async fn search(&self, request: &SearchRequest) -> RagResult<Vec<SearchResultSet>> {
        let data = self
            .call(
                "entities/search",
                body(vec![
                    ("collectionName", request.collection.clone().into()),
                    ("data", serde_json::json!([request.vector])),
                    ("annsField", request.vector_field.clone().into()),
                    ("filter", request.filter.clone().into()),
                    ("limit", request.limit.into()),
                    ("outputFields", serde_json::json!(request.output_fields)),
                    (
                        "searchParams",
                        serde_json::json!({
                            "metricType": request.metric.as_milvus(),
                            "params": request.params,
                        }),
                    ),
                ]),
            )
            .await?;
        Ok(vec![hits_to_result_set(
            data,
            &request.output_fields,
            &request.json_fields,
        )?])
    }

    async fn flush(&self, collection: &str) -> RagResult<()> {
        self.call(
            "collections/flush",
            body(vec![("collectionName", collection.into())]),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_transpose_to_rows() {
        let rows = columns_to_rows(&[
            Column::new("id", ColumnData::VarChar(vec!["a".into(), "b".into()])),
            Column::new("chunk_index", ColumnData::Int32(vec![0, 1])),
            Column::new("vector", ColumnData::FloatVector(vec![vec![0.5], vec![1.0]])),
        ])
        .unwrap();
        assert_eq!(
            rows[1],
            serde_json::json!({"id": "b", "chunk_index": 1, "vector": [1.0]})
        );
    }

    #[test]
    fn test_hits_become_typed_columns() {
        let data = serde_json::json!([
            {"distance": 0.9, "id": "a", "content": "x", "chunk_index": 0},
            {"distance": 0.4, "id": "b", "content": "y", "chunk_index": 3}
        ]);
        let fields = vec!["content".to_string(), "chunk_index".to_string()];
        let set = hits_to_result_set(data, &fields, &[]).unwrap();
        assert_eq!(set.scores, vec![0.9, 0.4]);
        assert_eq!(
            set.columns[0].data,
            ColumnData::VarChar(vec!["x".into(), "y".into()])
        );
        assert_eq!(set.columns[1].data, ColumnData::Int64(vec![0, 3]));
    }

    #[test]
    fn test_inconsistent_hit_types_fail() {
        let data = serde_json::json!([
            {"distance": 0.9, "content": "x"},
            {"distance": 0.4, "content": 7}
        ]);
        assert!(hits_to_result_set(data, &["content".to_string()], &[]).is_err());
    }

    #[test]
    fn test_json_field_keeps_any_value_shape() {
        let data = serde_json::json!([
            {"distance": 0.9, "metadata": "plain"},
            {"distance": 0.8, "metadata": [1, 2]},
            {"distance": 0.7, "metadata": {"page": 3}}
        ]);
        let fields = vec!["metadata".to_string()];
        let set = hits_to_result_set(data, &fields, &fields).unwrap();
        assert_eq!(
            set.columns[0].data,
            ColumnData::Json(vec![
                serde_json::json!("plain"),
                serde_json::json!([1, 2]),
                serde_json::json!({"page": 3}),
            ])
        );
    }

    #[test]
    fn test_classify_messages() {
        assert!(matches!(
            classify("collections/create", 65535, "collection already exists"),
            RagError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify("entities/search", 100, "can't find collection"),
            RagError::NotFound(_)
        ));
        assert!(classify("entities/insert", 65535, "timeout").is_retryable());
    }
}
