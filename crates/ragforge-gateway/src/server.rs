use crate::middleware::{auth_middleware, AuthConfig};
use crate::{chat, knowledge, models};
use axum::{
    middleware as axum_mw,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use ragforge_agent::{AgentDefinition, LlmRegistry, LlmSettings, StreamingController, ToolExecutor};
use ragforge_knowledge::{KnowledgeBaseService, MultiKbRetriever};
use ragforge_session::ModelStore;
use std::collections::HashMap;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;

/// Everything the handlers need, built once at process start.
pub struct AppState {
    /// Knowledge base and document operations.
    pub knowledge: Arc<KnowledgeBaseService>,
    /// Multi-KB retrieval for the direct RAG producer.
    pub retriever: Arc<MultiKbRetriever>,
    /// Chat turn execution and history.
    pub controller: Arc<StreamingController>,
    /// Registered models.
    pub models: Arc<dyn ModelStore>,
    /// Builds chat backends from settings or model records.
    pub llm: LlmRegistry,
    /// Chat model for direct answers and agents without their own model.
    pub default_llm: LlmSettings,
    /// Configured agents by id.
    pub agents: HashMap<String, AgentDefinition>,
    /// Tools available to agents.
    pub tools: Arc<dyn ToolExecutor>,
}

/// The HTTP gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Builds the router; `/health` stays outside the API key check.
    ///
    /// `max_concurrent_requests` caps in-flight API requests; 0 disables the cap.
    pub fn build(state: Arc<AppState>, auth: AuthConfig, max_concurrent_requests: usize) -> Router {
        let api = Router::new()
            .route(
                "/knowledge-bases",
                post(knowledge::create_knowledge_base).get(knowledge::list_knowledge_bases),
            )
            .route(
                "/knowledge-bases/{kb_id}",
                get(knowledge::get_knowledge_base).delete(knowledge::delete_knowledge_base),
            )
            .route(
                "/knowledge-bases/{kb_id}/documents",
                post(knowledge::attach_document).get(knowledge::list_documents),
            )
            .route(
                "/knowledge-bases/{kb_id}/documents/delete",
                post(knowledge::delete_documents),
            )
            .route(
                "/knowledge-bases/{kb_id}/documents/{document_id}/ingest",
                post(knowledge::ingest_document),
            )
            .route("/models", post(models::register_model).get(models::list_models))
            .route("/retrieve", post(knowledge::retrieve))
            .route("/chat", post(chat::chat))
            .route("/chat/stream", post(chat::chat_stream))
            .route(
                "/conversations",
                post(chat::create_conversation).get(chat::list_conversations),
            )
            .route(
                "/conversations/{conversation_id}/messages",
                get(chat::conversation_messages),
            )
            .layer(axum_mw::from_fn_with_state(Arc::new(auth), auth_middleware))
            .with_state(state);

        let api = if max_concurrent_requests > 0 {
            api.layer(ConcurrencyLimitLayer::new(max_concurrent_requests))
        } else {
            api
        };

        Router::new()
            .route("/health", get(health_handler))
            .nest("/api", api)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "ragforge"}))
}

/// Paging query shared by the list endpoints.
#[derive(Debug, serde::Deserialize)]
pub struct PageQuery {
    /// 1-based page number.
    #[serde(default = "default_page")]
    pub page: usize,
    /// Items per page.
    #[serde(default = "default_size")]
    pub size: usize,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    20
}
