use crate::error::ApiError;
use crate::middleware::CallerId;
use crate::server::{AppState, PageQuery};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use ragforge_core::{Chunk, Document, KnowledgeBase, Page};
use ragforge_knowledge::FileRef;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /api/knowledge-bases`.
#[derive(Debug, Deserialize)]
pub struct CreateKnowledgeBase {
    /// Display name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Embedding model; must belong to the caller.
    pub embed_model_id: String,
}

/// `POST /api/knowledge-bases`.
pub async fn create_knowledge_base(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Json(body): Json<CreateKnowledgeBase>,
) -> ApiResult<impl IntoResponse> {
    let kb = state
        .knowledge
        .create_knowledge_base(&user, &body.name, &body.description, &body.embed_model_id)
        .await?;
    Ok((StatusCode::CREATED, Json(kb)))
}

/// `GET /api/knowledge-bases`: the caller's knowledge bases.
pub async fn list_knowledge_bases(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Page<KnowledgeBase>>> {
    let listing = state
        .knowledge
        .list_knowledge_bases(&user, page.page, page.size)
        .await?;
    Ok(Json(listing))
}

/// `GET /api/knowledge-bases/{kb_id}`.
pub async fn get_knowledge_base(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path(kb_id): Path<String>,
) -> ApiResult<Json<KnowledgeBase>> {
    Ok(Json(state.knowledge.get_knowledge_base(&user, &kb_id).await?))
}

/// `DELETE /api/knowledge-bases/{kb_id}`: removes its vectors, documents and record.
pub async fn delete_knowledge_base(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path(kb_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.knowledge.delete_knowledge_base(&user, &kb_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// A stored file to attach; `file_name` is accepted as an alias of `name`.
#[derive(Debug, Deserialize)]
pub struct AttachDocument {
    /// The stored file.
    #[serde(flatten)]
    pub file: FileRef,
    /// Run ingestion right away.
    #[serde(default = "default_true")]
    pub ingest: bool,
}

fn default_true() -> bool {
    true
}

/// Response of the attach endpoint.
#[derive(Debug, Serialize)]
pub struct AttachedDocument {
    /// The document record, with its status after ingestion.
    pub document: Document,
    /// Chunks written; absent when ingestion was not requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
}

/// `POST /api/knowledge-bases/{kb_id}/documents`: attaches and, by default, ingests.
pub async fn attach_document(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path(kb_id): Path<String>,
    Json(body): Json<AttachDocument>,
) -> ApiResult<impl IntoResponse> {
    let document = state
        .knowledge
        .attach_document(&user, &kb_id, &body.file)
        .await?;
    let chunks = if body.ingest {
        Some(state.knowledge.ingest(&user, &kb_id, &document.id).await?)
    } else {
        None
    };
    Ok((StatusCode::CREATED, Json(AttachedDocument { document, chunks })))
}

/// `GET /api/knowledge-bases/{kb_id}/documents`.
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path(kb_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Page<Document>>> {
    let listing = state
        .knowledge
        .list_documents(&user, &kb_id, page.page, page.size)
        .await?;
    Ok(Json(listing))
}

/// `POST /api/knowledge-bases/{kb_id}/documents/{document_id}/ingest`: runs or reruns ingestion.
pub async fn ingest_document(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path((kb_id, document_id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let chunks = state.knowledge.ingest(&user, &kb_id, &document_id).await?;
    Ok(Json(serde_json::json!({ "document_id": document_id, "chunks": chunks })))
}

/// Body of the document delete endpoint.
#[derive(Debug, Deserialize)]
pub struct DeleteDocuments {
    /// Documents to remove.
    pub document_ids: Vec<String>,
}

/// `POST /api/knowledge-bases/{kb_id}/documents/delete`.
pub async fn delete_documents(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path(kb_id): Path<String>,
    Json(body): Json<DeleteDocuments>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state
        .knowledge
        .delete_documents(&user, &kb_id, &body.document_ids)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// Body of `POST /api/retrieve`.
#[derive(Debug, Deserialize)]
pub struct RetrieveRequest {
    /// Knowledge bases searched; all must belong to the caller.
    pub kb_ids: Vec<String>,
    /// Search text.
    pub query: String,
    /// Chunks returned after the global re-rank.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

/// `POST /api/retrieve`: ranked chunks across knowledge bases.
pub async fn retrieve(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Json(body): Json<RetrieveRequest>,
) -> ApiResult<Json<Vec<Chunk>>> {
    let chunks = state
        .retriever
        .retrieve(&body.kb_ids, &user, &body.query, body.top_k)
        .await?;
    Ok(Json(chunks))
}
