use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The `[rag]` configuration section.
///
/// Read at the start of every ingestion and retrieval, so a reload takes
/// effect on the next call without restarting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSettings {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
    /// Results requested from each knowledge base before the global merge.
    #[serde(default = "default_per_kb_top_k")]
    pub retrieve_per_kb_top_k: usize,
    /// Prior messages loaded as conversation history.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Embedding request timeout.
    #[serde(default = "default_embedding_timeout")]
    pub embedding_timeout_secs: u64,
}

fn default_chunk_size() -> usize {
    1000
}

fn default_overlap_size() -> usize {
    200
}

fn default_per_kb_top_k() -> usize {
    3
}

fn default_history_window() -> usize {
    50
}

fn default_embedding_timeout() -> u64 {
    30
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_size: default_overlap_size(),
            retrieve_per_kb_top_k: default_per_kb_top_k(),
            history_window: default_history_window(),
            embedding_timeout_secs: default_embedding_timeout(),
        }
    }
}

/// Settings shared between the components and the config watcher.
pub type SharedSettings = Arc<RwLock<RagSettings>>;

impl RagSettings {
    /// Wraps these settings for sharing.
    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}
