use crate::producer::{ChatInput, ChatProducer};
use crate::stream::{FragmentStream, StreamTee};
use chrono::Utc;
use futures_util::StreamExt;
use ragforge_core::{concat_fragments, Conversation, Message, Page, RagError, RagResult, Role};
use ragforge_knowledge::SharedSettings;
use ragforge_session::HistoryStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_TITLE: &str = "New conversation";
const TITLE_CHARS: usize = 40;

/// One chat turn.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Caller; owns the conversation.
    pub user_id: String,
    /// The question. Must not be blank.
    pub query: String,
    /// Conversation to continue; a new one is created when unset.
    pub conversation_id: Option<String>,
    /// Skip history entirely: nothing is read or written.
    pub debug: bool,
}

/// The caller's side of a streamed turn.
pub struct ChatStream {
    /// Conversation the turn belongs to; `None` in debug mode.
    pub conversation_id: Option<String>,
    /// Fragments for the caller. Ends early when the request is cancelled.
    pub fragments: FragmentStream,
    /// The detached persistence task; dropping the handle does not stop it.
    pub persistence: Option<JoinHandle<()>>,
}

/// Executes chat turns in debug or conversation mode.
///
/// In conversation mode the producer's stream is teed: one cursor goes to the
/// caller and honors the request's cancellation token, the other is drained by
/// a detached task that persists the full answer. That task only stops early
/// on the process-wide shutdown token, so a client disconnect never truncates
/// the stored transcript.
pub struct StreamingController {
    history: Arc<dyn HistoryStore>,
    settings: SharedSettings,
    shutdown: CancellationToken,
}

impl StreamingController {
    /// `shutdown` is the process-scoped token that ends background persistence.
    pub fn new(
        history: Arc<dyn HistoryStore>,
        settings: SharedSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            history,
            settings,
            shutdown,
        }
    }

    /// Streams the producer's answer to `request`.
    ///
    /// `cancel` is the request-scoped token; cancelling it closes
    /// [`ChatStream::fragments`] without waiting for the producer.
    pub async fn stream(
        &self,
        request: ChatRequest,
        producer: &dyn ChatProducer,
        cancel: CancellationToken,
    ) -> RagResult<ChatStream> {
        check_query(&request.query)?;
        if request.debug {
            debug!(user_id = %request.user_id, "Debug mode chat");
            let source = producer.stream(&ChatInput::query(request.query)).await?;
            return Ok(ChatStream {
                conversation_id: None,
                fragments: Box::pin(source.take_until(cancel.cancelled_owned())),
                persistence: None,
            });
        }

        let conversation_id = self.begin_turn(&request).await?;
        let input = ChatInput {
            query: request.query.clone(),
            history: self.prior_messages(&conversation_id).await?,
            grounding: Vec::new(),
        };
        self.history
            .append_message(&Message::user(&request.query, &conversation_id))
            .await?;

        let source = producer.stream(&input).await?;
        let mut cursors = StreamTee::split(source, 2);
        let (Some(background), Some(client)) = (cursors.pop(), cursors.pop()) else {
            return Err(RagError::Stream("stream tee returned too few cursors".into()));
        };

        let persistence = tokio::spawn(persist_when_done(
            Arc::clone(&self.history),
            conversation_id.clone(),
            background,
            self.shutdown.clone(),
        ));
        info!(conversation_id = %conversation_id, history = input.history.len(), "Conversation turn streaming");

        Ok(ChatStream {
            conversation_id: Some(conversation_id),
            fragments: Box::pin(client.take_until(cancel.cancelled_owned())),
            persistence: Some(persistence),
        })
    }

    /// Non-streaming variant of [`StreamingController::stream`].
    ///
    /// Returns the answer with its conversation id set (empty in debug mode).
    pub async fn generate(
        &self,
        request: ChatRequest,
        producer: &dyn ChatProducer,
    ) -> RagResult<Message> {
        check_query(&request.query)?;
        if request.debug {
            return producer.generate(&ChatInput::query(request.query)).await;
        }

        let conversation_id = self.begin_turn(&request).await?;
        let input = ChatInput {
            query: request.query.clone(),
            history: self.prior_messages(&conversation_id).await?,
            grounding: Vec::new(),
        };
        self.history
            .append_message(&Message::user(&request.query, &conversation_id))
            .await?;

        let mut answer = producer.generate(&input).await?;
        answer.conversation_id.clone_from(&conversation_id);
        let stored = self.history.append_message(&answer).await?;
        self.history
            .touch_conversation(&conversation_id, Utc::now())
            .await?;
        Ok(stored)
    }

    /// Creates an empty conversation with the default title.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> RagResult<Conversation> {
        let mut conversation =
            Conversation::new(Uuid::new_v4().to_string(), user_id, DEFAULT_TITLE);
        conversation.agent_id = agent_id.map(String::from);
        self.history.create_conversation(&conversation).await?;
        info!(conversation_id = %conversation.id, user_id, "Conversation created");
        Ok(conversation)
    }

    /// One page of the user's conversations, most recently active first.
    pub async fn list_conversations(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Conversation>> {
        self.history.list_conversations(user_id, page, size).await
    }

    /// The latest `limit` messages of one of the user's conversations, oldest first.
    pub async fn history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
    ) -> RagResult<Vec<Message>> {
        self.owned_conversation(user_id, conversation_id)
            .await?
            .ok_or_else(|| RagError::not_found_or_denied(format!("conversation {conversation_id}")))?;
        self.history.recent_messages(conversation_id, limit).await
    }

    /// Resolves the conversation of a turn, creating it if needed.
    async fn begin_turn(&self, request: &ChatRequest) -> RagResult<String> {
        let conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self
            .owned_conversation(&request.user_id, &conversation_id)
            .await?
            .is_some()
        {
            return Ok(conversation_id);
        }

        let conversation = Conversation::new(
            conversation_id.as_str(),
            request.user_id.as_str(),
            title_from(&request.query),
        );
        match self.history.create_conversation(&conversation).await {
            Ok(()) => {
                debug!(conversation_id = %conversation_id, "Conversation created for turn");
                Ok(conversation_id)
            }
            Err(RagError::AlreadyExists(_)) => {
                debug!(conversation_id = %conversation_id, "Conversation created concurrently");
                self.owned_conversation(&request.user_id, &conversation_id)
                    .await?
                    .map(|_| conversation_id.clone())
                    .ok_or_else(|| {
                        RagError::not_found_or_denied(format!("conversation {conversation_id}"))
                    })
            }
            Err(e) => Err(e),
        }
    }

    /// `Ok(None)` when absent; `Unauthorized` when owned by someone else.
    async fn owned_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> RagResult<Option<Conversation>> {
        match self.history.get_conversation(conversation_id).await? {
            Some(c) if c.user_id != user_id => Err(RagError::not_found_or_denied(format!(
                "conversation {conversation_id}"
            ))),
            other => Ok(other),
        }
    }

    async fn prior_messages(&self, conversation_id: &str) -> RagResult<Vec<Message>> {
        let window = self.settings.read().history_window;
        self.history.recent_messages(conversation_id, window).await
    }
}

fn check_query(query: &str) -> RagResult<()> {
    if query.trim().is_empty() {
        return Err(RagError::Validation("query cannot be empty".into()));
    }
    Ok(())
}

fn title_from(query: &str) -> String {
    let title: String = query.trim().chars().take(TITLE_CHARS).collect();
    if title.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        title
    }
}

async fn persist_when_done(
    history: Arc<dyn HistoryStore>,
    conversation_id: String,
    cursor: FragmentStream,
    shutdown: CancellationToken,
) {
    tokio::select! {
        _ = shutdown.cancelled() => {
            warn!(conversation_id = %conversation_id, "Shutdown before the answer finished; turn not persisted");
        }
        _ = persist_answer(history.as_ref(), &conversation_id, cursor) => {}
    }
}

async fn persist_answer(history: &dyn HistoryStore, conversation_id: &str, mut cursor: FragmentStream) {
    let mut fragments = Vec::new();
    while let Some(item) = cursor.next().await {
        match item {
            Ok(fragment) => fragments.push(fragment),
            Err(e) => {
                warn!(
                    conversation_id,
                    received = fragments.len(),
                    error = %e,
                    "Answer stream failed; partial answer discarded"
                );
                return;
            }
        }
    }

    let received = fragments.len();
    let merged = match concat_fragments(fragments) {
        Ok(merged) => merged,
        Err(e) => {
            warn!(conversation_id, error = %e, "Answer stream was empty; nothing persisted");
            return;
        }
    };
    let answer = Message::new(
        merged.role.unwrap_or(Role::Assistant),
        merged.content,
        conversation_id,
    );
    if let Err(e) = history.append_message(&answer).await {
        error!(conversation_id, error = %e, "Failed to persist assistant answer");
        return;
    }
    if let Err(e) = history.touch_conversation(conversation_id, Utc::now()).await {
        error!(conversation_id, error = %e, "Failed to update conversation activity");
        return;
    }
    info!(conversation_id, fragments = received, "Assistant answer persisted");
}
