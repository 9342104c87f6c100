#![allow(clippy::unwrap_used, clippy::expect_used)]
//! OpenAI-compatible backend and producer tests against a mock chat server.

use async_trait::async_trait;
use futures_util::StreamExt;
use ragforge_agent::*;
use ragforge_core::{concat_fragments, ModelKind, ModelRecord, RagError, RagResult, Role};
use ragforge_knowledge::*;
use ragforge_memory::{
    EmbeddingOptions, EmbeddingRegistry, InMemoryDriver, VectorStoreConfig, VectorStoreEngine,
};
use ragforge_session::{InMemoryRecordStore, ModelStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const USER: &str = "alice";

fn settings(server: &MockServer) -> LlmSettings {
    LlmSettings {
        provider: "openai".into(),
        model: "gpt-test".into(),
        api_key: "sk-test".into(),
        base_url: Some(format!("{}/v1", server.uri())),
        ..LlmSettings::default()
    }
}

fn backend(server: &MockServer) -> Arc<dyn LlmBackend> {
    LlmRegistry::with_defaults().build(&settings(server)).unwrap()
}

fn sse(events: &[&str]) -> ResponseTemplate {
    let body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

fn text_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "choices": [{"message": {"role": "assistant", "content": text}, "finish_reason": "stop"}]
    })
}

// ---------------------------------------------------------------------------
// 1. Streaming backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_streams_fragments_until_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(body_partial_json(serde_json::json!({"stream": true, "model": "gpt-test"})))
        .respond_with(sse(&[
            r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            r#"{"choices":[{"delta":{"content":" world"}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]))
        .mount(&server)
        .await;

    let stream = backend(&server).chat_stream(Some("be brief"), &[]).await.unwrap();
    let fragments: Vec<_> = stream.map(|f| f.unwrap()).collect().await;
    assert_eq!(fragments.len(), 3);
    let merged = concat_fragments(fragments).unwrap();
    assert_eq!(merged.role, Some(Role::Assistant));
    assert_eq!(merged.content, "Hello world");
}

#[tokio::test]
async fn test_truncated_stream_ends_with_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(sse(&[r#"{"choices":[{"delta":{"content":"Hel"}}]}"#]))
        .mount(&server)
        .await;

    let items: Vec<_> = backend(&server)
        .chat_stream(None, &[])
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap().content, "Hel");
    assert!(matches!(items[1], Err(RagError::Stream(_))));
}

/// Serves one streamed chat response, writing `parts` as separate HTTP chunks.
async fn serve_chunked(parts: Vec<Vec<u8>>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
        let content_length: usize = headers
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .map(|v| v.trim().parse().unwrap())
            .unwrap_or(0);
        while request.len() < header_end + content_length {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                  transfer-encoding: chunked\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
        for part in parts {
            socket
                .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                .await
                .unwrap();
            socket.write_all(&part).await.unwrap();
            socket.write_all(b"\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });
    format!("http://{addr}/v1")
}

#[tokio::test]
async fn test_multibyte_character_split_across_chunks() {
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"知识库\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    )
    .as_bytes();
    // Cut after the first byte of the three-byte 知.
    let cut = body.iter().position(|&b| b == 0xE7).unwrap() + 1;
    let base_url = serve_chunked(vec![body[..cut].to_vec(), body[cut..].to_vec()]).await;

    let backend = LlmRegistry::with_defaults()
        .build(&LlmSettings {
            provider: "openai".into(),
            model: "gpt-test".into(),
            api_key: "sk-test".into(),
            base_url: Some(base_url),
            ..LlmSettings::default()
        })
        .unwrap();

    let fragments: Vec<_> = backend
        .chat_stream(None, &[])
        .await
        .unwrap()
        .map(|f| f.unwrap())
        .collect()
        .await;
    let merged = concat_fragments(fragments).unwrap();
    assert_eq!(merged.content, "知识库");
    assert!(!merged.content.contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_rejected_request_fails_before_streaming() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let err = backend(&server).chat_stream(None, &[]).await.err().unwrap();
    assert!(matches!(err, RagError::Llm(_)));
    assert!(err.to_string().contains("429"));
}

// ---------------------------------------------------------------------------
// 2. RAG answer producer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_rag_producer_grounds_prompt_in_retrieved_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let records = Arc::new(InMemoryRecordStore::new());
    let engine = Arc::new(VectorStoreEngine::new(
        Arc::new(InMemoryDriver::new()),
        VectorStoreConfig::default(),
    ));
    let storage = Arc::new(LocalStorage::new(dir.path()).unwrap());
    let rag = RagSettings {
        chunk_size: 60,
        overlap_size: 0,
        ..RagSettings::default()
    }
    .shared();
    let embeddings = EmbeddingRegistry::with_defaults(EmbeddingOptions::default());
    let pipeline = Arc::new(IngestionPipeline::new(
        records.clone(),
        records.clone(),
        records.clone(),
        embeddings.clone(),
        engine.clone(),
        storage.clone(),
        LoaderRegistry::with_defaults(reqwest::Client::new()),
        rag.clone(),
    ));
    let retriever = Arc::new(MultiKbRetriever::new(
        records.clone(),
        records.clone(),
        embeddings,
        engine.clone(),
        rag,
    ));
    let service = KnowledgeBaseService::new(
        records.clone(),
        records.clone(),
        records.clone(),
        engine,
        pipeline,
        retriever.clone(),
    );

    records
        .create_model(&ModelRecord {
            id: "bow".into(),
            user_id: USER.into(),
            kind: ModelKind::Embedding,
            provider: "local".into(),
            base_url: String::new(),
            model_name: "bag-of-words".into(),
            api_key: String::new(),
            dimension: 64,
            max_output_length: 0,
            max_tokens: 0,
        })
        .await
        .unwrap();
    let kb = service
        .create_knowledge_base(USER, "handbook", "", "bow")
        .await
        .unwrap();
    storage
        .put("handbook.txt", b"The office coffee machine is on floor three.")
        .await
        .unwrap();
    let doc = service
        .attach_document(
            USER,
            &kb.id,
            &FileRef {
                name: "handbook.txt".into(),
                storage_key: "handbook.txt".into(),
                mime_type: "text/plain".into(),
            },
        )
        .await
        .unwrap();
    service.ingest(USER, &kb.id, &doc.id).await.unwrap();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("coffee machine is on floor three"))
        .and(body_string_contains("[1] handbook.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("Floor three [1].")))
        .mount(&server)
        .await;

    let producer = RagAnswerProducer::new(retriever, backend(&server), USER, vec![kb.id.clone()], 3);
    let answer = producer
        .generate(&ChatInput::query("where is the coffee machine?"))
        .await
        .unwrap();
    assert_eq!(answer.role, Role::Assistant);
    assert_eq!(answer.content, "Floor three [1].");
}

// ---------------------------------------------------------------------------
// 3. Agent producer
// ---------------------------------------------------------------------------

struct Clock {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolExecutor for Clock {
    fn tools(&self) -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "current_time".into(),
            description: "Returns the current time".into(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
        }]
    }

    async fn execute(&self, call: &ToolCall) -> RagResult<ToolOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(call.name, "current_time");
        Ok(ToolOutput {
            content: "12:30".into(),
            is_error: false,
        })
    }
}

fn empty_retriever() -> Arc<MultiKbRetriever> {
    let records = Arc::new(InMemoryRecordStore::new());
    Arc::new(MultiKbRetriever::new(
        records.clone(),
        records,
        EmbeddingRegistry::with_defaults(EmbeddingOptions::default()),
        Arc::new(VectorStoreEngine::new(
            Arc::new(InMemoryDriver::new()),
            VectorStoreConfig::default(),
        )),
        RagSettings::default().shared(),
    ))
}

fn definition(max_steps: u32) -> AgentDefinition {
    serde_json::from_value(serde_json::json!({
        "id": "clock-agent",
        "system_prompt": "You tell the time.",
        "max_steps": max_steps
    }))
    .unwrap()
}

#[tokio::test]
async fn test_agent_runs_tool_then_streams_final_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("tool_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_body("It is 12:30.")))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "current_time", "arguments": "{}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })))
        .mount(&server)
        .await;

    let clock = Arc::new(Clock {
        calls: AtomicUsize::new(0),
    });
    let agent = AgentProducer::new(
        definition(4),
        backend(&server),
        empty_retriever(),
        clock.clone(),
        USER,
    );
    let fragments: Vec<_> = agent
        .stream(&ChatInput::query("what time is it?"))
        .await
        .unwrap()
        .map(|f| f.unwrap())
        .collect()
        .await;

    assert_eq!(clock.calls.load(Ordering::SeqCst), 1);
    assert_eq!(concat_fragments(fragments).unwrap().content, "It is 12:30.");
}

#[tokio::test]
async fn test_agent_gives_up_after_max_steps() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "current_time", "arguments": "{}"}
                    }]
                }
            }]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let clock = Arc::new(Clock {
        calls: AtomicUsize::new(0),
    });
    let agent = AgentProducer::new(definition(2), backend(&server), empty_retriever(), clock, USER);
    let err = agent
        .generate(&ChatInput::query("loop forever"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Llm(_)));
    assert!(err.to_string().contains("maximum of 2 steps"));
}

#[tokio::test]
async fn test_agent_without_tools_streams_directly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(serde_json::json!({"stream": true})))
        .respond_with(sse(&[
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#,
            "[DONE]",
        ]))
        .mount(&server)
        .await;

    let agent = AgentProducer::new(
        definition(3),
        backend(&server),
        empty_retriever(),
        Arc::new(NoTools),
        USER,
    );
    let items: Vec<_> = agent
        .stream(&ChatInput::query("hello"))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].as_ref().unwrap().content, "Hi");
}
