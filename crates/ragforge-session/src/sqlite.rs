//! SQLite-backed record store.
//!
//! One connection guarded by a mutex; every call runs on the blocking pool.
//! Timestamps are stored as fixed-width RFC 3339 text so they sort correctly.

use crate::store::{page_offset, DocumentStore, HistoryStore, KnowledgeBaseStore, ModelStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use ragforge_core::{
    Conversation, Document, DocumentStatus, KnowledgeBase, Message, ModelKind, ModelRecord, Page,
    RagError, RagResult, Role,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS knowledge_bases (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    embed_model_id  TEXT NOT NULL,
    collection_name TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_kb_user ON knowledge_bases(user_id);

CREATE TABLE IF NOT EXISTS documents (
    id         TEXT PRIMARY KEY,
    kb_id      TEXT NOT NULL,
    file_key   TEXT NOT NULL,
    title      TEXT NOT NULL,
    doc_type   TEXT NOT NULL DEFAULT '',
    status     INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_documents_kb ON documents(kb_id);

CREATE TABLE IF NOT EXISTS models (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL,
    kind              TEXT NOT NULL,
    provider          TEXT NOT NULL,
    base_url          TEXT NOT NULL,
    model_name        TEXT NOT NULL,
    api_key           TEXT NOT NULL DEFAULT '',
    dimension         INTEGER NOT NULL DEFAULT 0,
    max_output_length INTEGER NOT NULL DEFAULT 0,
    max_tokens        INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS conversations (
    id         TEXT PRIMARY KEY,
    user_id    TEXT NOT NULL,
    agent_id   TEXT,
    title      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    order_seq       INTEGER NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    metadata        TEXT NOT NULL DEFAULT '{}',
    created_at      TEXT NOT NULL,
    UNIQUE (conversation_id, order_seq)
);
"#;

/// Record store persisted in a SQLite database file.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> RagResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(store_err)?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Record store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> RagResult<Self> {
        Self::from_connection(Connection::open_in_memory().map_err(store_err)?)
    }

    fn from_connection(conn: Connection) -> RagResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(store_err)?;
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> RagResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> RagResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| RagError::Store(format!("store task failed: {e}")))?
    }
}

fn store_err(e: rusqlite::Error) -> RagError {
    RagError::Store(e.to_string())
}

fn insert_err(what: String) -> impl FnOnce(rusqlite::Error) -> RagError {
    move |e| match e.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => RagError::AlreadyExists(what),
        _ => store_err(e),
    }
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn read_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn read_usize(row: &Row<'_>, idx: usize) -> rusqlite::Result<usize> {
    let raw: i64 = row.get(idx)?;
    usize::try_from(raw).map_err(|e| conversion_err(idx, e))
}

fn read_u32(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let raw: i64 = row.get(idx)?;
    u32::try_from(raw).map_err(|e| conversion_err(idx, e))
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Debug)]
struct UnknownValue(String);

impl std::fmt::Display for UnknownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown value '{}'", self.0)
    }
}

impl std::error::Error for UnknownValue {}

const KB_COLUMNS: &str =
    "id, user_id, name, description, embed_model_id, collection_name, created_at, updated_at";

fn kb_from_row(row: &Row<'_>) -> rusqlite::Result<KnowledgeBase> {
    Ok(KnowledgeBase {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        embed_model_id: row.get(4)?,
        collection_name: row.get(5)?,
        created_at: read_ts(row, 6)?,
        updated_at: read_ts(row, 7)?,
    })
}

const DOC_COLUMNS: &str = "id, kb_id, file_key, title, doc_type, status, created_at, updated_at";

fn doc_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    let code: i32 = row.get(5)?;
    let status = DocumentStatus::from_code(code)
        .ok_or_else(|| conversion_err(5, UnknownValue(code.to_string())))?;
    Ok(Document {
        id: row.get(0)?,
        kb_id: row.get(1)?,
        file_key: row.get(2)?,
        title: row.get(3)?,
        doc_type: row.get(4)?,
        status,
        created_at: read_ts(row, 6)?,
        updated_at: read_ts(row, 7)?,
    })
}

const MODEL_COLUMNS: &str = "id, user_id, kind, provider, base_url, model_name, api_key, \
     dimension, max_output_length, max_tokens";

fn kind_str(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::Embedding => "embedding",
        ModelKind::Llm => "llm",
    }
}

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelRecord> {
    let kind: String = row.get(2)?;
    let kind = match kind.as_str() {
        "embedding" => ModelKind::Embedding,
        "llm" => ModelKind::Llm,
        _ => return Err(conversion_err(2, UnknownValue(kind.clone()))),
    };
    Ok(ModelRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind,
        provider: row.get(3)?,
        base_url: row.get(4)?,
        model_name: row.get(5)?,
        api_key: row.get(6)?,
        dimension: read_usize(row, 7)?,
        max_output_length: read_u32(row, 8)?,
        max_tokens: read_u32(row, 9)?,
    })
}

const CONVERSATION_COLUMNS: &str = "id, user_id, agent_id, title, created_at, updated_at";

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_id: row.get(2)?,
        title: row.get(3)?,
        created_at: read_ts(row, 4)?,
        updated_at: read_ts(row, 5)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id).map_err(|e| conversion_err(0, e))?;
    let role: String = row.get(3)?;
    let role = Role::parse(&role).ok_or_else(|| conversion_err(3, UnknownValue(role)))?;
    let metadata: String = row.get(5)?;
    let metadata = serde_json::from_str(&metadata).map_err(|e| conversion_err(5, e))?;
    Ok(Message {
        id,
        conversation_id: row.get(1)?,
        order: row.get(2)?,
        role,
        content: row.get(4)?,
        metadata,
        timestamp: read_ts(row, 6)?,
    })
}

#[async_trait]
impl KnowledgeBaseStore for SqliteRecordStore {
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> RagResult<()> {
        let kb = kb.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO knowledge_bases ({KB_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    kb.id,
                    kb.user_id,
                    kb.name,
                    kb.description,
                    kb.embed_model_id,
                    kb.collection_name,
                    ts(&kb.created_at),
                    ts(&kb.updated_at),
                ],
            )
            .map_err(insert_err(format!("knowledge base {}", kb.id)))?;
            Ok(())
        })
        .await
    }

    async fn get_knowledge_base(&self, id: &str) -> RagResult<Option<KnowledgeBase>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {KB_COLUMNS} FROM knowledge_bases WHERE id = ?1"),
                params![id],
                kb_from_row,
            )
            .optional()
            .map_err(store_err)
        })
        .await
    }

    async fn list_knowledge_bases(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<KnowledgeBase>> {
        let user_id = user_id.to_string();
        let offset = to_i64(page_offset(page, size));
        let limit = to_i64(size);
        self.with_conn(move |conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM knowledge_bases WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {KB_COLUMNS} FROM knowledge_bases WHERE user_id = ?1 \
                     ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3"
                ))
                .map_err(store_err)?;
            let items = stmt
                .query_map(params![user_id, limit, offset], kb_from_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            Ok(Page {
                items,
                total: usize::try_from(total).unwrap_or_default(),
            })
        })
        .await
    }

    async fn delete_knowledge_base_cascade(&self, id: &str) -> RagResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            tx.execute("DELETE FROM documents WHERE kb_id = ?1", params![id])
                .map_err(store_err)?;
            tx.execute("DELETE FROM knowledge_bases WHERE id = ?1", params![id])
                .map_err(store_err)?;
            tx.commit().map_err(store_err)
        })
        .await
    }
}

#[async_trait]
impl DocumentStore for SqliteRecordStore {
    async fn create_document(&self, doc: &Document) -> RagResult<()> {
        let doc = doc.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO documents ({DOC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    doc.id,
                    doc.kb_id,
                    doc.file_key,
                    doc.title,
                    doc.doc_type,
                    doc.status.code(),
                    ts(&doc.created_at),
                    ts(&doc.updated_at),
                ],
            )
            .map_err(insert_err(format!("document {}", doc.id)))?;
            Ok(())
        })
        .await
    }

    async fn get_document(&self, id: &str) -> RagResult<Option<Document>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {DOC_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                doc_from_row,
            )
            .optional()
            .map_err(store_err)
        })
        .await
    }

    async fn list_documents(
        &self,
        kb_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Document>> {
        let kb_id = kb_id.to_string();
        let offset = to_i64(page_offset(page, size));
        let limit = to_i64(size);
        self.with_conn(move |conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents WHERE kb_id = ?1",
                    params![kb_id],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {DOC_COLUMNS} FROM documents WHERE kb_id = ?1 \
                     ORDER BY created_at DESC, id ASC LIMIT ?2 OFFSET ?3"
                ))
                .map_err(store_err)?;
            let items = stmt
                .query_map(params![kb_id, limit, offset], doc_from_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            Ok(Page {
                items,
                total: usize::try_from(total).unwrap_or_default(),
            })
        })
        .await
    }

    async fn document_ids(&self, kb_id: &str) -> RagResult<Vec<String>> {
        let kb_id = kb_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM documents WHERE kb_id = ?1 ORDER BY id")
                .map_err(store_err)?;
            let ids = stmt
                .query_map(params![kb_id], |row| row.get(0))
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(store_err)?;
            Ok(ids)
        })
        .await
    }

    async fn update_document_status(&self, id: &str, status: DocumentStatus) -> RagResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![status.code(), ts(&Utc::now()), id],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(RagError::NotFound(format!("document {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn delete_documents(&self, kb_id: &str, ids: &[String]) -> RagResult<usize> {
        let kb_id = kb_id.to_string();
        let ids = ids.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            let mut removed = 0;
            {
                let mut stmt = tx
                    .prepare("DELETE FROM documents WHERE id = ?1 AND kb_id = ?2")
                    .map_err(store_err)?;
                for id in &ids {
                    removed += stmt.execute(params![id, kb_id]).map_err(store_err)?;
                }
            }
            tx.commit().map_err(store_err)?;
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl ModelStore for SqliteRecordStore {
    async fn create_model(&self, model: &ModelRecord) -> RagResult<()> {
        let model = model.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO models ({MODEL_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    model.id,
                    model.user_id,
                    kind_str(model.kind),
                    model.provider,
                    model.base_url,
                    model.model_name,
                    model.api_key,
                    to_i64(model.dimension),
                    model.max_output_length,
                    model.max_tokens,
                ],
            )
            .map_err(insert_err(format!("model {}", model.id)))?;
            Ok(())
        })
        .await
    }

    async fn get_model(&self, id: &str) -> RagResult<Option<ModelRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1"),
                params![id],
                model_from_row,
            )
            .optional()
            .map_err(store_err)
        })
        .await
    }

    async fn list_models(
        &self,
        user_id: &str,
        kind: Option<ModelKind>,
    ) -> RagResult<Vec<ModelRecord>> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {MODEL_COLUMNS} FROM models \
                     WHERE user_id = ?1 AND (?2 IS NULL OR kind = ?2) ORDER BY id"
                ))
                .map_err(store_err)?;
            let models = stmt
                .query_map(params![user_id, kind.map(kind_str)], model_from_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            Ok(models)
        })
        .await
    }
}

#[async_trait]
impl HistoryStore for SqliteRecordStore {
    async fn create_conversation(&self, conversation: &Conversation) -> RagResult<()> {
        let c = conversation.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO conversations ({CONVERSATION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
                ),
                params![
                    c.id,
                    c.user_id,
                    c.agent_id,
                    c.title,
                    ts(&c.created_at),
                    ts(&c.updated_at),
                ],
            )
            .map_err(insert_err(format!("conversation {}", c.id)))?;
            Ok(())
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> RagResult<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id],
                conversation_from_row,
            )
            .optional()
            .map_err(store_err)
        })
        .await
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> RagResult<Page<Conversation>> {
        let user_id = user_id.to_string();
        let offset = to_i64(page_offset(page, size));
        let limit = to_i64(size);
        self.with_conn(move |conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM conversations WHERE user_id = ?1",
                    params![user_id],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE user_id = ?1 \
                     ORDER BY updated_at DESC, id ASC LIMIT ?2 OFFSET ?3"
                ))
                .map_err(store_err)?;
            let items = stmt
                .query_map(params![user_id, limit, offset], conversation_from_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            Ok(Page {
                items,
                total: usize::try_from(total).unwrap_or_default(),
            })
        })
        .await
    }

    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> RagResult<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                    params![ts(&at), id],
                )
                .map_err(store_err)?;
            if changed == 0 {
                return Err(RagError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn append_message(&self, message: &Message) -> RagResult<Message> {
        let mut stored = message.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(store_err)?;
            let next: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(order_seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
                    params![stored.conversation_id],
                    |row| row.get(0),
                )
                .map_err(store_err)?;
            stored.order = next;
            let metadata = serde_json::to_string(&stored.metadata)?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, order_seq, role, content, metadata, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stored.id.to_string(),
                    stored.conversation_id,
                    stored.order,
                    stored.role.as_str(),
                    stored.content,
                    metadata,
                    ts(&stored.timestamp),
                ],
            )
            .map_err(insert_err(format!("message {}", stored.id)))?;
            tx.commit().map_err(store_err)?;
            Ok(stored)
        })
        .await
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> RagResult<Vec<Message>> {
        let conversation_id = conversation_id.to_string();
        let limit = to_i64(limit);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, order_seq, role, content, metadata, created_at \
                     FROM messages WHERE conversation_id = ?1 ORDER BY order_seq DESC LIMIT ?2",
                )
                .map_err(store_err)?;
            let mut messages = stmt
                .query_map(params![conversation_id, limit], message_from_row)
                .map_err(store_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(store_err)?;
            messages.reverse();
            Ok(messages)
        })
        .await
    }
}
