#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the vector store engine over the in-memory and
//! Milvus REST drivers.

use async_trait::async_trait;
use ragforge_core::{Chunk, RagError, RagResult};
use ragforge_memory::driver::{
    CollectionInfo, CollectionSchema, IndexParams, SearchRequest, SearchResultSet,
};
use ragforge_memory::*;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config() -> VectorStoreConfig {
    VectorStoreConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
        },
        ..VectorStoreConfig::default()
    }
}

fn engine_with(driver: Arc<InMemoryDriver>) -> VectorStoreEngine {
    VectorStoreEngine::new(driver, fast_config())
}

fn chunk(id: &str, kb: &str, doc: &str, index: i32, embedding: Vec<f32>) -> Chunk {
    Chunk {
        id: id.into(),
        content: format!("content of {id}"),
        kb_id: kb.into(),
        document_id: doc.into(),
        document_name: format!("{doc}.txt"),
        index,
        embedding,
        score: None,
        metadata: None,
    }
}

// ---------------------------------------------------------------------------
// 1. Collection lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ensure_collection_is_idempotent() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());

    engine.ensure_collection("embed_m1", 3).await.unwrap();
    engine.ensure_collection("embed_m1", 3).await.unwrap();

    let schema = driver.schema("embed_m1").await.unwrap();
    assert_eq!(schema.dimension(), Some(3));
    assert_eq!(schema.fields.len(), 7);
    assert!(driver.has_collection("embed_m1").await.unwrap());
}

#[tokio::test]
async fn test_ensure_collection_rejects_dimension_mismatch() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver);
    engine.ensure_collection("embed_m1", 3).await.unwrap();
    let err = engine.ensure_collection("embed_m1", 4).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
}

#[tokio::test]
async fn test_metadata_field_is_optional() {
    let driver = Arc::new(InMemoryDriver::new());
    let config = VectorStoreConfig {
        with_metadata: true,
        ..fast_config()
    };
    let engine = VectorStoreEngine::new(driver.clone(), config);
    engine.ensure_collection("c", 2).await.unwrap();
    assert_eq!(driver.schema("c").await.unwrap().fields.len(), 8);

    let mut c = chunk("a", "kb", "d", 0, vec![1.0, 0.0]);
    c.metadata = Some(serde_json::json!({"page": 3}));
    engine.write_chunks("c", vec![c]).await.unwrap();
    let hits = engine
        .search("c", &["kb".to_string()], &[1.0, 0.0], 1)
        .await
        .unwrap();
    assert_eq!(hits[0].metadata, Some(serde_json::json!({"page": 3})));
}

// ---------------------------------------------------------------------------
// 2. Writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_chunks_are_skipped() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();

    let mut empty_content = chunk("b", "kb", "d", 1, vec![0.0, 1.0]);
    empty_content.content.clear();
    let chunks = vec![
        chunk("a", "kb", "d", 0, vec![1.0, 0.0]),
        empty_content,
        chunk("c", "kb", "d", 2, Vec::new()),
        chunk("d", "kb", "d", 3, vec![0.5, 0.5]),
    ];

    let written = engine.write_chunks("c", chunks).await.unwrap();
    assert_eq!(written, 2);
    assert_eq!(driver.row_count("c").await, 2);
}

#[tokio::test]
async fn test_all_invalid_chunks_fail() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();

    let err = engine
        .write_chunks("c", vec![chunk("a", "kb", "d", 0, Vec::new())])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert!(err.to_string().contains("no valid chunks"));
    assert_eq!(driver.insert_calls(), 0);
}

#[tokio::test]
async fn test_document_name_is_truncated_to_250() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver);
    engine.ensure_collection("c", 2).await.unwrap();

    let mut long = chunk("long", "kb", "d1", 0, vec![1.0, 0.0]);
    long.document_name = "n".repeat(251);
    let mut short = chunk("short", "kb", "d2", 0, vec![0.0, 1.0]);
    short.document_name = "s".repeat(249);
    engine.write_chunks("c", vec![long, short]).await.unwrap();

    let hits = engine
        .search("c", &["kb".to_string()], &[1.0, 1.0], 10)
        .await
        .unwrap();
    let name_of = |id: &str| {
        hits.iter()
            .find(|c| c.id == id)
            .map(|c| c.document_name.chars().count())
            .unwrap()
    };
    assert_eq!(name_of("long"), 250);
    assert_eq!(name_of("short"), 249);
}

#[tokio::test]
async fn test_oversized_id_is_a_validation_error() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();
    let c = chunk(&"x".repeat(65), "kb", "d", 0, vec![1.0, 0.0]);
    let err = engine.write_chunks("c", vec![c]).await.unwrap_err();
    assert!(matches!(err, RagError::Validation(_)));
    assert_eq!(driver.insert_calls(), 0);
}

#[tokio::test]
async fn test_transient_insert_failures_are_retried() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();

    driver.fail_next_inserts(2);
    let written = engine
        .write_chunks("c", vec![chunk("a", "kb", "d", 0, vec![1.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(driver.insert_calls(), 3);
}

#[tokio::test]
async fn test_exhausted_retries_aggregate_errors() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();

    driver.fail_next_inserts(5);
    let err = engine
        .write_chunks("c", vec![chunk("a", "kb", "d", 0, vec![1.0, 0.0])])
        .await
        .unwrap_err();
    match err {
        RagError::RetryExhausted { errors, .. } => assert_eq!(errors.len(), 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(driver.insert_calls(), 3);
    assert_eq!(driver.row_count("c").await, 0);
}

#[tokio::test]
async fn test_flush_option_makes_rows_searchable() {
    let driver = Arc::new(InMemoryDriver::with_deferred_visibility());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();
    let kb = vec!["kb".to_string()];

    engine
        .write_chunks("c", vec![chunk("a", "kb", "d", 0, vec![1.0, 0.0])])
        .await
        .unwrap();
    assert!(engine.search("c", &kb, &[1.0, 0.0], 5).await.unwrap().is_empty());

    engine
        .write_chunks_with(
            "c",
            vec![chunk("b", "kb", "d", 1, vec![0.0, 1.0])],
            WriteOptions { flush: true },
        )
        .await
        .unwrap();
    assert_eq!(driver.flush_calls(), 1);
    assert_eq!(engine.search("c", &kb, &[1.0, 0.0], 5).await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// 3. Deletes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_chunks_by_document() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver.clone());
    engine.ensure_collection("c", 2).await.unwrap();
    engine
        .write_chunks(
            "c",
            vec![
                chunk("a", "kb", "d1", 0, vec![1.0, 0.0]),
                chunk("b", "kb", "d1", 1, vec![1.0, 0.0]),
                chunk("c", "kb", "d2", 0, vec![0.0, 1.0]),
                chunk("e", "kb", "d3", 0, vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();

    engine.delete_chunks("c", &[]).await.unwrap();
    assert_eq!(driver.row_count("c").await, 4);

    engine
        .delete_chunks("c", &["d1".to_string(), "d3".to_string()])
        .await
        .unwrap();
    assert_eq!(driver.row_count("c").await, 1);
}

#[tokio::test]
async fn test_delete_on_missing_collection_is_noop() {
    let engine = engine_with(Arc::new(InMemoryDriver::new()));
    engine
        .delete_chunks("never_created", &["d1".to_string()])
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// 4. Search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_search_filters_by_kb_and_orders_descending() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver);
    engine.ensure_collection("c", 2).await.unwrap();
    engine
        .write_chunks(
            "c",
            vec![
                chunk("a1", "A", "d1", 0, vec![1.0, 0.0]),
                chunk("a2", "A", "d1", 1, vec![0.7, 0.7]),
                chunk("b1", "B", "d2", 0, vec![1.0, 0.1]),
                chunk("c1", "C", "d3", 0, vec![1.0, 0.0]),
            ],
        )
        .await
        .unwrap();

    let hits = engine
        .search("c", &["A".to_string(), "B".to_string()], &[1.0, 0.0], 2)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|c| c.kb_id == "A" || c.kb_id == "B"));
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].id, "a1");
}

#[tokio::test]
async fn test_chunk_finds_itself_with_maximal_score() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver);
    let dim = 64;
    let embedder = LocalEmbedding::new(dim);
    engine.ensure_collection("c", dim).await.unwrap();

    let texts = [
        "vector database collections",
        "streaming token responses",
        "document ingestion pipeline",
    ];
    let mut chunks = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let embedding = embedder.embed(text).await.unwrap();
        let mut c = chunk(&format!("c{i}"), "kb", "d", i as i32, embedding);
        c.content = text.to_string();
        chunks.push(c);
    }
    let target = chunks[1].clone();
    engine.write_chunks("c", chunks).await.unwrap();

    let hits = engine
        .search("c", &["kb".to_string()], &target.embedding, 3)
        .await
        .unwrap();
    assert_eq!(hits[0].id, target.id);
    assert!((hits[0].score.unwrap() - 1.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_l2_scores_are_descending_similarities() {
    let driver = Arc::new(InMemoryDriver::new());
    let mut config = fast_config();
    config.index.metric = MetricType::L2;
    let engine = VectorStoreEngine::new(driver, config);
    engine.ensure_collection("c", 2).await.unwrap();
    engine
        .write_chunks(
            "c",
            vec![
                chunk("far", "kb", "d", 0, vec![9.0, 9.0]),
                chunk("near", "kb", "d", 1, vec![1.0, 1.0]),
            ],
        )
        .await
        .unwrap();
    let hits = engine
        .search("c", &["kb".to_string()], &[1.0, 1.0], 2)
        .await
        .unwrap();
    assert_eq!(hits[0].id, "near");
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn test_search_missing_collection_is_not_found() {
    let engine = engine_with(Arc::new(InMemoryDriver::new()));
    let err = engine
        .search("nope", &["kb".to_string()], &[1.0], 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::NotFound(_)));
}

#[tokio::test]
async fn test_search_with_no_kb_matches_nothing() {
    let driver = Arc::new(InMemoryDriver::new());
    let engine = engine_with(driver);
    engine.ensure_collection("c", 2).await.unwrap();
    engine
        .write_chunks("c", vec![chunk("a", "kb", "d", 0, vec![1.0, 0.0])])
        .await
        .unwrap();
    assert!(engine.search("c", &[], &[1.0, 0.0], 3).await.unwrap().is_empty());
}

/// Driver returning a result set whose `chunk_index` column is a string.
struct MistypedDriver;

#[async_trait]
impl VectorDriver for MistypedDriver {
    async fn has_collection(&self, _: &str) -> RagResult<bool> {
        Ok(true)
    }
    async fn describe_collection(&self, name: &str) -> RagResult<Option<CollectionInfo>> {
        Ok(Some(CollectionInfo {
            name: name.to_string(),
            dimension: Some(2),
            loaded: true,
        }))
    }
    async fn create_collection(&self, _: &CollectionSchema) -> RagResult<()> {
        Ok(())
    }
    async fn create_index(&self, _: &str, _: &IndexParams) -> RagResult<()> {
        Ok(())
    }
    async fn load_collection(&self, _: &str) -> RagResult<()> {
        Ok(())
    }
    async fn insert(&self, _: &str, _: Vec<Column>) -> RagResult<usize> {
        Ok(0)
    }
    async fn delete(&self, _: &str, _: &str) -> RagResult<()> {
        Ok(())
    }
    async fn search(&self, request: &SearchRequest) -> RagResult<Vec<SearchResultSet>> {
        let columns = request
            .output_fields
            .iter()
            .map(|name| Column::new(name.clone(), ColumnData::VarChar(vec!["0".into()])))
            .collect();
        Ok(vec![SearchResultSet {
            columns,
            scores: vec![0.9],
        }])
    }
    async fn flush(&self, _: &str) -> RagResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_mistyped_column_fails_the_whole_search() {
    let engine = VectorStoreEngine::new(Arc::new(MistypedDriver), fast_config());
    let err = engine
        .search("c", &["kb".to_string()], &[1.0, 0.0], 3)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::VectorStore(_)));
    assert!(err.to_string().contains("chunk_index"));
}

// ---------------------------------------------------------------------------
// 5. Milvus REST driver through the engine
// ---------------------------------------------------------------------------

fn ok(data: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({"code": 0, "data": data}))
}

#[tokio::test]
async fn test_milvus_ensure_collection_creates_indexes_and_loads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(ok(serde_json::json!({"has": false})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/create"))
        .and(body_partial_json(serde_json::json!({"collectionName": "embed_m1"})))
        .respond_with(ok(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/indexes/create"))
        .and(body_partial_json(serde_json::json!({
            "indexParams": [{
                "fieldName": "vector",
                "metricType": "COSINE",
                "params": {"index_type": "IVF_FLAT", "nlist": 128}
            }]
        })))
        .respond_with(ok(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/load"))
        .respond_with(ok(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let driver = MilvusRestDriver::new(server.uri(), Duration::from_secs(5)).unwrap();
    let engine = VectorStoreEngine::new(Arc::new(driver), fast_config());
    engine.ensure_collection("embed_m1", 768).await.unwrap();
}

#[tokio::test]
async fn test_milvus_search_decodes_and_resorts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(ok(serde_json::json!({"has": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/describe"))
        .respond_with(ok(serde_json::json!({
            "collectionName": "c",
            "fields": [{"name": "vector", "type": "FloatVector", "params": [{"key": "dim", "value": "2"}]}],
            "load": "LoadStateLoaded"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/search"))
        .and(body_partial_json(serde_json::json!({"filter": "kb_id == \"kb\"", "limit": 5})))
        .respond_with(ok(serde_json::json!([
            {"distance": 0.2, "id": "x", "content": "low", "document_id": "d",
             "document_name": "d.txt", "kb_id": "kb", "chunk_index": 1},
            {"distance": 0.8, "id": "y", "content": "high", "document_id": "d",
             "document_name": "d.txt", "kb_id": "kb", "chunk_index": 0}
        ])))
        .mount(&server)
        .await;

    let driver = MilvusRestDriver::new(server.uri(), Duration::from_secs(5)).unwrap();
    let engine = VectorStoreEngine::new(Arc::new(driver), fast_config());
    let hits = engine
        .search("c", &["kb".to_string()], &[1.0, 0.0], 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "y");
    assert_eq!(hits[0].index, 0);
    assert_eq!(hits[1].content, "low");
}

#[tokio::test]
async fn test_milvus_search_keeps_metadata_of_any_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(ok(serde_json::json!({"has": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/describe"))
        .respond_with(ok(serde_json::json!({
            "collectionName": "c",
            "fields": [{"name": "vector", "type": "FloatVector", "params": [{"key": "dim", "value": "2"}]}],
            "load": "LoadStateLoaded"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/search"))
        .and(body_partial_json(serde_json::json!({
            "outputFields": ["id", "content", "document_id", "document_name", "kb_id", "chunk_index", "metadata"]
        })))
        .respond_with(ok(serde_json::json!([
            {"distance": 0.9, "id": "x", "content": "a", "document_id": "d",
             "document_name": "d.txt", "kb_id": "kb", "chunk_index": 0, "metadata": "scanned"},
            {"distance": 0.5, "id": "y", "content": "b", "document_id": "d",
             "document_name": "d.txt", "kb_id": "kb", "chunk_index": 1, "metadata": [1, 2]}
        ])))
        .mount(&server)
        .await;

    let driver = MilvusRestDriver::new(server.uri(), Duration::from_secs(5)).unwrap();
    let config = VectorStoreConfig {
        with_metadata: true,
        ..fast_config()
    };
    let engine = VectorStoreEngine::new(Arc::new(driver), config);
    let hits = engine
        .search("c", &["kb".to_string()], &[1.0, 0.0], 5)
        .await
        .unwrap();
    assert_eq!(hits[0].metadata, Some(serde_json::json!("scanned")));
    assert_eq!(hits[1].metadata, Some(serde_json::json!([1, 2])));
}

#[tokio::test]
async fn test_milvus_insert_error_is_retried_then_aggregated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/insert"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"code": 65535, "message": "node busy"})),
        )
        .expect(3)
        .mount(&server)
        .await;

    let driver = MilvusRestDriver::new(server.uri(), Duration::from_secs(5))
        .unwrap()
        .with_token("root:Milvus");
    let engine = VectorStoreEngine::new(Arc::new(driver), fast_config());
    let err = engine
        .write_chunks("c", vec![chunk("a", "kb", "d", 0, vec![1.0, 0.0])])
        .await
        .unwrap_err();
    match err {
        RagError::RetryExhausted { errors, .. } => {
            assert_eq!(errors.len(), 3);
            assert!(errors.iter().all(|e| e.contains("node busy")));
        }
        other => panic!("unexpected error: {other}"),
    }
}
