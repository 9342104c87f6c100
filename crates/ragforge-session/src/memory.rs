use crate::store::{page_offset, DocumentStore, HistoryStore, KnowledgeBaseStore, ModelStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ragforge_core::{
    Conversation, Document, DocumentStatus, KnowledgeBase, Message, ModelKind, ModelRecord, Page,
    RagError, RagResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Records {
    knowledge_bases: HashMap<String, KnowledgeBase>,
    documents: HashMap<String, Document>,
    models: HashMap<String, ModelRecord>,
    conversations: HashMap<String, Conversation>,
    messages: HashMap<String, Vec<Message>>,
}

/// Record store held entirely in memory. Used by tests and `--ephemeral` runs.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<Records>,
    failing_transactions: AtomicUsize,
}

impl InMemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` cascade deletes fail without changing anything.
    pub fn fail_next_transactions(&self, n: usize) {
        self.failing_transactions.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> RagResult<()> {
        let tripped = self
            .failing_transactions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(RagError::Store("transaction aborted".into()));
        }
        Ok(())
    }
}

fn paginate<T: Clone>(mut items: Vec<T>, page: usize, size: usize) -> Page<T> {
    let total = items.len();
    let offset = page_offset(page, size).min(total);
    let items = items.drain(offset..).take(size).collect();
    Page { items, total }
}

#[async_trait]
impl KnowledgeBaseStore for InMemoryRecordStore {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> RagResult<()> {
        let mut records = self.records.write().await;
        if records.knowledge_bases.contains_key(&kb.id) {
            return Err(RagError::AlreadyExists(format!("knowledge base {}", kb.id)));
        }
        records.knowledge_bases.insert(kb.id.clone(), kb.clone());
        Ok(())
    }

    async fn get_knowledge_base(&self, id: &str) -> RagResult<Option<KnowledgeBase>> {
        Ok(self.records.read().await.knowledge_bases.get(id).cloned())
    }

    async fn list_knowledge_bases(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<KnowledgeBase>> {
        let records = self.records.read().await;
        let mut owned: Vec<KnowledgeBase> = records
            .knowledge_bases
            .values()
            .filter(|kb| kb.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(owned, page, size))
    }

    async fn delete_knowledge_base_cascade(&self, id: &str) -> RagResult<()> {
        self.take_failure()?;
        let mut records = self.records.write().await;
        records.knowledge_bases.remove(id);
        records.documents.retain(|_, doc| doc.kb_id != id);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryRecordStore {
    async fn create_document(&self, doc: &Document) -> RagResult<()> {
        let mut records = self.records.write().await;
        if records.documents.contains_key(&doc.id) {
            return Err(RagError::AlreadyExists(format!("document {}", doc.id)));
        }
        records.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> RagResult<Option<Document>> {
        Ok(self.records.read().await.documents.get(id).cloned())
    }

    async fn list_documents(
        &self,
        kb_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Document>> {
        let records = self.records.read().await;
        let mut docs: Vec<Document> = records
            .documents
            .values()
            .filter(|d| d.kb_id == kb_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(docs, page, size))
    }

    async fn document_ids(&self, kb_id: &str) -> RagResult<Vec<String>> {
        let records = self.records.read().await;
        let mut ids: Vec<String> = records
            .documents
            .values()
            .filter(|d| d.kb_id == kb_id)
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> RagResult<()> {
        let mut records = self.records.write().await;
        let doc = records
            .documents
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("document {id}")))?;
        doc.status = status;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_documents(&self, kb_id: &str, ids: &[String]) -> RagResult<usize> {
        self.take_failure()?;
        let mut records = self.records.write().await;
        let before = records.documents.len();
        records
            .documents
            .retain(|id, doc| !(doc.kb_id == kb_id && ids.contains(id)));
        Ok(before - records.documents.len())
    }
}

#[async_trait]
impl ModelStore for InMemoryRecordStore {
    async fn create_model(&self, model: &ModelRecord) -> RagResult<()> {
        let mut records = self.records.write().await;
        if records.models.contains_key(&model.id) {
            return Err(RagError::AlreadyExists(format!("model {}", model.id)));
        }
        records.models.insert(model.id.clone(), model.clone());
        Ok(())
    }

    async fn get_model(&self, id: &str) -> RagResult<Option<ModelRecord>> {
        Ok(self.records.read().await.models.get(id).cloned())
    }

    async fn list_models(
        &self,
        user_id: &str,
        kind: Option<ModelKind>,
    ) -> RagResult<Vec<ModelRecord>> {
        let records = self.records.read().await;
        let mut models: Vec<ModelRecord> = records
            .models
            .values()
            .filter(|m| m.user_id == user_id && kind.map_or(true, |k| m.kind == k))
            .cloned()
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }
}

#[async_trait]
impl HistoryStore for InMemoryRecordStore {
    async fn create_conversation(&self, conversation: &Conversation) -> RagResult<()> {
        let mut records = self.records.write().await;
        if records.conversations.contains_key(&conversation.id) {
            return Err(RagError::AlreadyExists(format!(
                "conversation {}",
                conversation.id
            )));
        }
        records
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn get_conversation(&self, id: &str) -> RagResult<Option<Conversation>> {
        Ok(self.records.read().await.conversations.get(id).cloned())
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Conversation>> {
        let records = self.records.read().await;
        let mut owned: Vec<Conversation> = records
            .conversations
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(paginate(owned, page, size))
    }

    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> RagResult<()> {
        let mut records = self.records.write().await;
        let conversation = records
            .conversations
            .get_mut(id)
            .ok_or_else(|| RagError::NotFound(format!("conversation {id}")))?;
        conversation.updated_at = at;
        Ok(())
    }

    async fn append_message(&self, message: &Message) -> RagResult<Message> {
        let mut records = self.records.write().await;
        let log = records
            .messages
            .entry(message.conversation_id.clone())
            .or_default();
        let mut stored = message.clone();
        stored.order = log.last().map_or(1, |m| m.order + 1);
        log.push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> RagResult<Vec<Message>> {
        let records = self.records.read().await;
        let Some(log) = records.messages.get(conversation_id) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }
}
