use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragforge_core::{
    Conversation, Document, DocumentStatus, KnowledgeBase, Message, ModelKind, ModelRecord, Page,
    RagResult,
};

/// Number of prior messages loaded as history when the caller gives no limit.
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

/// Knowledge base records.
#[async_trait]
pub trait KnowledgeBaseStore: Send + Sync {
    /// Inserts a new knowledge base.
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> RagResult<()>;

    /// Looks a knowledge base up by id.
    async fn get_knowledge_base(&self, id: &str) -> RagResult<Option<KnowledgeBase>>;

    /// Lists a user's knowledge bases, newest first. `page` is 1-based.
    async fn list_knowledge_bases(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<KnowledgeBase>>;

    /// Deletes a knowledge base and all of its documents in one transaction.
    ///
    /// Vector rows are not touched; callers delete them before calling this.
    async fn delete_knowledge_base_cascade(&self, id: &str) -> RagResult<()>;
}

/// Document records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document.
    async fn create_document(&self, doc: &Document) -> RagResult<()>;

    /// Looks a document up by id.
    async fn get_document(&self, id: &str) -> RagResult<Option<Document>>;

    /// Lists the documents of a knowledge base, newest first. `page` is 1-based.
    async fn list_documents(&self, kb_id: &str, page: usize, size: usize)
        -> RagResult<Page<Document>>;

    /// Ids of every document in a knowledge base.
    async fn document_ids(&self, kb_id: &str) -> RagResult<Vec<String>>;

    /// Sets a document's ingestion status and bumps `updated_at`.
    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> RagResult<()>;

    /// Deletes the listed documents of one knowledge base in one transaction.
    ///
    /// Returns the number of rows removed; ids outside `kb_id` are ignored.
    async fn delete_documents(&self, kb_id: &str, ids: &[String]) -> RagResult<usize>;
}

/// Registered model records.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Inserts a new model record.
    async fn create_model(&self, model: &ModelRecord) -> RagResult<()>;

    /// Looks a model up by id.
    async fn get_model(&self, id: &str) -> RagResult<Option<ModelRecord>>;

    /// Lists a user's models, optionally only one kind.
    async fn list_models(&self, user_id: &str, kind: Option<ModelKind>)
        -> RagResult<Vec<ModelRecord>>;
}

/// Conversations and their append-only message log.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Inserts a conversation; fails with `AlreadyExists` if the id is taken.
    async fn create_conversation(&self, conversation: &Conversation) -> RagResult<()>;

    /// Looks a conversation up by id.
    async fn get_conversation(&self, id: &str) -> RagResult<Option<Conversation>>;

    /// Lists a user's conversations, most recently active first. `page` is 1-based.
    async fn list_conversations(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Conversation>>;

    /// Sets a conversation's last-activity time.
    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> RagResult<()>;

    /// Appends a message, assigning the next order key. Returns the stored message.
    async fn append_message(&self, message: &Message) -> RagResult<Message>;

    /// The latest `limit` messages of a conversation in ascending order.
    async fn recent_messages(&self, conversation_id: &str, limit: usize)
        -> RagResult<Vec<Message>>;
}

/// Offset of a 1-based page; page 0 is treated as page 1.
pub(crate) fn page_offset(page: usize, size: usize) -> usize {
    page.max(1).saturating_sub(1).saturating_mul(size)
}
