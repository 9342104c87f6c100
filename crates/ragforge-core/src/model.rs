use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derives the vector collection bound to an embedding model.
///
/// Knowledge bases sharing an embedding model share the collection. Every
/// character outside `[A-Za-z0-9]` becomes `_`.
pub fn collection_name_for(embed_model_id: &str) -> String {
    let normalized: String = embed_model_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("embed_{normalized}")
}

/// A user-owned document collection bound to one embedding model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBase {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Embedding model every document of this base is embedded with.
    pub embed_model_id: String,
    /// Physical vector collection, derived from `embed_model_id`.
    pub collection_name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    /// Creates a knowledge base with a fresh id and derived collection name.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        embed_model_id: impl Into<String>,
    ) -> Self {
        let embed_model_id = embed_model_id.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            name: name.into(),
            description: description.into(),
            collection_name: collection_name_for(&embed_model_id),
            embed_model_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ingestion state of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Attached, not yet ingested.
    Pending,
    /// Ingestion started and has not completed.
    Processing,
    /// All chunks are embedded and written.
    Completed,
    /// The last ingestion attempt failed; may be ingested again.
    Failed,
}

impl DocumentStatus {
    /// Integer code stored in the relational store.
    pub fn code(&self) -> i32 {
        match self {
            DocumentStatus::Pending => 0,
            DocumentStatus::Processing => 1,
            DocumentStatus::Completed => 2,
            DocumentStatus::Failed => 3,
        }
    }

    /// Inverse of [`DocumentStatus::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(DocumentStatus::Pending),
            1 => Some(DocumentStatus::Processing),
            2 => Some(DocumentStatus::Completed),
            3 => Some(DocumentStatus::Failed),
            _ => None,
        }
    }
}

/// A file attached to a knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: String,
    /// Owning knowledge base.
    pub kb_id: String,
    /// Key of the backing file in the storage collaborator.
    pub file_key: String,
    /// Display title, the original file name.
    pub title: String,
    /// MIME type of the source file.
    pub doc_type: String,
    /// Ingestion state.
    pub status: DocumentStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a `Pending` document.
    pub fn new(
        kb_id: impl Into<String>,
        file_key: impl Into<String>,
        title: impl Into<String>,
        doc_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kb_id: kb_id.into(),
            file_key: file_key.into(),
            title: title.into(),
            doc_type: doc_type.into(),
            status: DocumentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A unit of document text plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique identifier.
    pub id: String,
    /// Chunk text.
    pub content: String,
    /// Owning knowledge base.
    pub kb_id: String,
    /// Owning document.
    pub document_id: String,
    /// Display name of the owning document.
    pub document_name: String,
    /// 0-based ordinal within the document.
    pub index: i32,
    /// Embedding vector; empty on search results.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Similarity score, only set on search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Optional loader-provided metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// What a registered model is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Text to vector.
    Embedding,
    /// Chat completion.
    Llm,
}

/// A model registered by a user: provider, endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Unique identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Embedding or chat.
    pub kind: ModelKind,
    /// Provider discriminator, e.g. `openai` or `ollama`.
    pub provider: String,
    /// API base URL.
    pub base_url: String,
    /// Model name sent to the provider.
    pub model_name: String,
    /// API key, empty when the provider needs none.
    #[serde(default)]
    pub api_key: String,
    /// Vector dimension for embedding models.
    #[serde(default)]
    pub dimension: usize,
    /// Output token budget for chat models.
    #[serde(default)]
    pub max_output_length: u32,
    /// Context window for chat models.
    #[serde(default)]
    pub max_tokens: u32,
}

/// A conversation owned by a user, optionally bound to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier, chosen by the client.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Agent answering in this conversation, if any.
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last activity time.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Creates a conversation with the given client-chosen id.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            agent_id: None,
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One page of a listing plus the total row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Rows of this page.
    pub items: Vec<T>,
    /// Total rows across all pages.
    pub total: usize,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_normalizes() {
        assert_eq!(collection_name_for("text-embedding-3"), "embed_text_embedding_3");
        assert_eq!(collection_name_for("a.b/c d"), "embed_a_b_c_d");
        assert_eq!(collection_name_for("abc123"), "embed_abc123");
    }

    #[test]
    fn test_kb_shares_collection_per_model() {
        let a = KnowledgeBase::new("u1", "a", "", "m-1");
        let b = KnowledgeBase::new("u2", "b", "", "m-1");
        assert_ne!(a.id, b.id);
        assert_eq!(a.collection_name, b.collection_name);
    }

    #[test]
    fn test_status_codes_roundtrip() {
        for status in [
            DocumentStatus::Pending,
            DocumentStatus::Processing,
            DocumentStatus::Completed,
            DocumentStatus::Failed,
        ] {
            assert_eq!(DocumentStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(DocumentStatus::from_code(9), None);
    }

    #[test]
    fn test_new_document_is_pending() {
        let doc = Document::new("kb", "files/a.pdf", "a.pdf", "application/pdf");
        assert_eq!(doc.status, DocumentStatus::Pending);
    }
}
