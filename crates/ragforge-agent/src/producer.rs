use crate::backends::LlmBackend;
use crate::context::{render_references, ContextWindow};
use crate::llm::LlmResponse;
use crate::stream::FragmentStream;
use async_trait::async_trait;
use ragforge_core::{Chunk, Message, RagResult};
use ragforge_knowledge::MultiKbRetriever;
use std::sync::Arc;
use tracing::debug;

const RAG_SYSTEM_PROMPT: &str = "You are a knowledge base assistant. Answer the user's question \
using the reference material below. Cite references by their number. If the references do not \
contain the answer, say that you do not know instead of guessing.";

/// What a producer answers: the query, prior turns and optional grounding.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    /// The current question.
    pub query: String,
    /// Prior messages, oldest first.
    pub history: Vec<Message>,
    /// Chunks to ground the answer in. Producers that retrieve on their own
    /// only do so when this is empty.
    pub grounding: Vec<Chunk>,
}

impl ChatInput {
    /// A query with no history and no grounding.
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// Produces an answer for a [`ChatInput`], whole or as fragments.
#[async_trait]
pub trait ChatProducer: Send + Sync {
    /// The complete answer message. Its conversation id is left empty.
    async fn generate(&self, input: &ChatInput) -> RagResult<Message>;

    /// The answer as an ordered fragment stream.
    async fn stream(&self, input: &ChatInput) -> RagResult<FragmentStream>;
}

/// Answers directly from retrieved chunks with a single model call.
pub struct RagAnswerProducer {
    retriever: Arc<MultiKbRetriever>,
    backend: Arc<dyn LlmBackend>,
    user_id: String,
    kb_ids: Vec<String>,
    top_k: usize,
    history_limit: usize,
}

impl RagAnswerProducer {
    /// Answers for `user_id` from the top `top_k` chunks of `kb_ids`.
    pub fn new(
        retriever: Arc<MultiKbRetriever>,
        backend: Arc<dyn LlmBackend>,
        user_id: impl Into<String>,
        kb_ids: Vec<String>,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            backend,
            user_id: user_id.into(),
            kb_ids,
            top_k,
            history_limit: ragforge_session::DEFAULT_HISTORY_WINDOW,
        }
    }

    async fn context(&self, input: &ChatInput) -> RagResult<ContextWindow> {
        let grounding = if input.grounding.is_empty() {
            self.retriever
                .retrieve(&self.kb_ids, &self.user_id, &input.query, self.top_k)
                .await?
        } else {
            input.grounding.clone()
        };

        let mut ctx = ContextWindow::new(self.history_limit + 1);
        if grounding.is_empty() {
            ctx.set_system_prompt(RAG_SYSTEM_PROMPT);
        } else {
            ctx.set_system_prompt(format!(
                "{RAG_SYSTEM_PROMPT}\n\nReferences:\n{}",
                render_references(&grounding)
            ));
        }
        ctx.extend(input.history.iter().cloned());
        ctx.push(Message::user(&input.query, ""));
        debug!(
            chunks = grounding.len(),
            messages = ctx.messages().len(),
            estimated_tokens = ctx.estimated_tokens(),
            "RAG prompt assembled"
        );
        Ok(ctx)
    }
}

#[async_trait]
impl ChatProducer for RagAnswerProducer {
    async fn generate(&self, input: &ChatInput) -> RagResult<Message> {
        let ctx = self.context(input).await?;
        let text = match self
            .backend
            .chat(ctx.system_prompt(), ctx.messages(), &[])
            .await?
        {
            LlmResponse::Done(text) => text,
            LlmResponse::ToolUse { content, .. } => content.unwrap_or_default(),
        };
        Ok(Message::assistant(text, ""))
    }

    async fn stream(&self, input: &ChatInput) -> RagResult<FragmentStream> {
        let ctx = self.context(input).await?;
        self.backend
            .chat_stream(ctx.system_prompt(), ctx.messages())
            .await
    }
}
