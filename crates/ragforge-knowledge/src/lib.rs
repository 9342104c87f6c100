//! Document ingestion and knowledge-base retrieval.
//!
//! Turns stored files into embedded, indexed chunks and answers queries
//! across one or more knowledge bases.
//!
//! # Main types
//!
//! - [`IngestionPipeline`]: Load, split, embed and index one document.
//! - [`MultiKbRetriever`]: Fan a query out over several knowledge bases and rank the merge.
//! - [`KnowledgeBaseService`]: Knowledge-base and document lifecycle, including the cross-store delete.
//! - [`RecursiveSplitter`]: Overlapping character-window splitter.
//! - [`LoaderRegistry`]: Picks a parser by file extension.

/// File loaders and the extension-keyed registry.
pub mod loader;
/// The ingestion state machine.
pub mod pipeline;
/// Multi knowledge base retrieval.
pub mod retriever;
/// Knowledge-base and document operations.
pub mod service;
/// Runtime-tunable retrieval and splitting parameters.
pub mod settings;
/// Recursive text splitter.
pub mod splitter;
/// File storage capability.
pub mod storage;

pub use loader::{Loader, LoaderRegistry, PdfLoader, SourceDocument, TextLoader};
pub use pipeline::IngestionPipeline;
pub use retriever::MultiKbRetriever;
pub use service::{FileRef, KnowledgeBaseService};
pub use settings::{RagSettings, SharedSettings};
pub use splitter::{RecursiveSplitter, Splitter};
pub use storage::{FileStorage, LocalStorage};
