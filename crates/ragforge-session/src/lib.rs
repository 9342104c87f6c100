//! Relational records: knowledge bases, documents, models and chat history.
//!
//! The store traits are implemented by an in-memory store for tests and a
//! SQLite store for the server.

/// Lock-guarded in-memory store.
pub mod memory;
/// SQLite store.
pub mod sqlite;
/// Store traits.
pub mod store;

pub use memory::InMemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use store::{DocumentStore, HistoryStore, KnowledgeBaseStore, ModelStore, DEFAULT_HISTORY_WINDOW};
