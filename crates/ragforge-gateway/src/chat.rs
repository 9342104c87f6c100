use crate::error::ApiError;
use crate::middleware::CallerId;
use crate::server::{AppState, PageQuery};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures_util::{stream, Stream, StreamExt};
use ragforge_agent::{
    AgentProducer, ChatProducer, ChatRequest, FragmentStream, RagAnswerProducer,
};
use ragforge_core::{Conversation, Fragment, Message, Page, RagError, RagResult};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

type ApiResult<T> = Result<T, ApiError>;

/// Body of `/api/chat` and `/api/chat/stream`.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// The question.
    pub query: String,
    /// Conversation to continue; one is created when unset.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Debug mode: no history is read or written.
    #[serde(default)]
    pub debug: bool,
    /// Answer with a configured agent instead of the direct RAG producer.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Knowledge bases for the direct RAG producer.
    #[serde(default)]
    pub kb_ids: Vec<String>,
    /// Chunks retrieved for grounding.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    5
}

impl ChatBody {
    fn request(&self, user: &str) -> ChatRequest {
        ChatRequest {
            user_id: user.to_string(),
            query: self.query.clone(),
            conversation_id: self.conversation_id.clone(),
            debug: self.debug,
        }
    }
}

/// Picks the producer for one request: the named agent, or a direct RAG answer.
async fn producer_for(
    state: &AppState,
    user: &str,
    body: &ChatBody,
) -> RagResult<Box<dyn ChatProducer>> {
    let Some(agent_id) = &body.agent_id else {
        let backend = state.llm.build(&state.default_llm)?;
        return Ok(Box::new(RagAnswerProducer::new(
            Arc::clone(&state.retriever),
            backend,
            user,
            body.kb_ids.clone(),
            body.top_k,
        )));
    };

    let definition = state
        .agents
        .get(agent_id)
        .cloned()
        .ok_or_else(|| RagError::NotFound(format!("agent {agent_id}")))?;
    let backend = match &definition.llm_model_id {
        Some(model_id) => {
            let record = state
                .models
                .get_model(model_id)
                .await?
                .filter(|m| m.user_id == user)
                .ok_or_else(|| RagError::not_found_or_denied(format!("model {model_id}")))?;
            state.llm.build_for_record(&record)?
        }
        None => state.llm.build(&state.default_llm)?,
    };
    Ok(Box::new(AgentProducer::new(
        definition,
        backend,
        Arc::clone(&state.retriever),
        Arc::clone(&state.tools),
        user,
    )))
}

/// `POST /api/chat`: the whole answer as one message.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Json(body): Json<ChatBody>,
) -> ApiResult<Json<Message>> {
    let producer = producer_for(&state, &user, &body).await?;
    let answer = state
        .controller
        .generate(body.request(&user), producer.as_ref())
        .await?;
    Ok(Json(answer))
}

/// Streams the answer as server-sent events.
///
/// Events: `conversation` (conversation mode only, first), one `message` per
/// fragment, then `done`; a producer failure ends the stream with `error`.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Json(body): Json<ChatBody>,
) -> ApiResult<impl IntoResponse> {
    let producer = producer_for(&state, &user, &body).await?;
    let cancel = CancellationToken::new();
    let chat = state
        .controller
        .stream(body.request(&user), producer.as_ref(), cancel.clone())
        .await?;
    info!(user_id = %user, conversation_id = ?chat.conversation_id, debug = body.debug, "Chat stream opened");

    let head = chat
        .conversation_id
        .map(|id| {
            Event::default()
                .event("conversation")
                .json_data(serde_json::json!({ "conversation_id": id }))
                .unwrap_or_else(|_| Event::default().event("conversation"))
        })
        .into_iter();
    let events = stream::iter(head).chain(fragment_events(chat.fragments, cancel.drop_guard()));
    Ok(Sse::new(events.map(Ok::<_, Infallible>)).keep_alive(KeepAlive::default()))
}

/// Converts fragments to SSE events, terminated by `done` or `error`.
///
/// Holds the request's cancellation guard, so dropping the response body
/// (client disconnect) cancels the request token.
fn fragment_events(fragments: FragmentStream, guard: DropGuard) -> impl Stream<Item = Event> {
    stream::unfold(Some((fragments, guard)), |state| async move {
        let (mut fragments, guard) = state?;
        match fragments.next().await {
            Some(Ok(fragment)) => Some((message_event(&fragment), Some((fragments, guard)))),
            Some(Err(e)) => {
                debug!(error = %e, "Chat stream ended with an error");
                Some((error_event(&e), None))
            }
            None => Some((Event::default().event("done").data("[DONE]"), None)),
        }
    })
}

fn message_event(fragment: &Fragment) -> Event {
    Event::default()
        .event("message")
        .json_data(fragment)
        .unwrap_or_else(|e| error_event(&RagError::Stream(e.to_string())))
}

fn error_event(err: &RagError) -> Event {
    let (_, kind) = ApiError::classify(err);
    let payload = serde_json::json!({ "error": err.to_string(), "kind": kind });
    Event::default().event("error").data(payload.to_string())
}

/// Optional body of `POST /api/conversations`.
#[derive(Debug, Default, Deserialize)]
pub struct CreateConversation {
    /// Agent the conversation is bound to.
    #[serde(default)]
    pub agent_id: Option<String>,
}

/// `POST /api/conversations`.
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    body: Option<Json<CreateConversation>>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    let conversation = state
        .controller
        .create_conversation(&user, body.agent_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// `GET /api/conversations`: the caller's conversations, most recent first.
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Page<Conversation>>> {
    let listing = state
        .controller
        .list_conversations(&user, page.page, page.size)
        .await?;
    Ok(Json(listing))
}

/// Query of the conversation messages endpoint.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Most recent messages returned.
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    ragforge_session::DEFAULT_HISTORY_WINDOW
}

/// `GET /api/conversations/{conversation_id}/messages`, oldest first.
pub async fn conversation_messages(
    State(state): State<Arc<AppState>>,
    CallerId(user): CallerId,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .controller
        .history(&user, &conversation_id, query.limit)
        .await?;
    Ok(Json(messages))
}
