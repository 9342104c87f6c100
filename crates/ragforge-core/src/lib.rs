//! Core types and error definitions for the RagForge backend.
//!
//! This crate provides the foundational types shared across all RagForge crates,
//! including error handling, conversation messages, and the records that describe
//! knowledge bases, documents, chunks and model bindings.
//!
//! # Main types
//!
//! - [`RagError`]: Unified error enum for all RagForge subsystems.
//! - [`RagResult`]: Convenience alias for `Result<T, RagError>`.
//! - [`Message`] / [`Fragment`]: Conversation messages and streamed pieces of them.
//! - [`KnowledgeBase`], [`Document`], [`Chunk`]: The ingestion data model.
//! - [`ModelRecord`]: A user-registered embedding or chat model.

/// Error enum and result alias.
pub mod error;
/// Conversation messages and fragment concatenation.
pub mod message;
/// Knowledge base, document, chunk, model and conversation records.
pub mod model;

pub use error::{RagError, RagResult};
pub use message::{concat_fragments, Fragment, Message, Role};
pub use model::{
    collection_name_for, Chunk, Conversation, Document, DocumentStatus, KnowledgeBase, ModelKind,
    ModelRecord, Page,
};
