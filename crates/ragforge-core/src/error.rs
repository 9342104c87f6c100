/// A convenience `Result` alias using [`RagError`].
pub type RagResult<T> = Result<T, RagError>;

/// Top-level error type for the RagForge backend.
///
/// Variants follow the failure classes the services distinguish: configuration
/// and validation failures are never retried, infrastructure failures may be.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// Missing or invalid embedding, LLM or server configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Input rejected before any side effect (empty chunk set, bad filter, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The addressed record or collection does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller does not own the addressed resource.
    ///
    /// The message never reveals whether the resource exists.
    #[error("Access denied: {0}")]
    Unauthorized(String),

    /// A record with the same identity already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// An error reported by the vector database.
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// An error from an embedding provider.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// An error from the file/storage collaborator.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A document could not be loaded, parsed or split.
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// An error from a chat model backend.
    #[error("LLM error: {0}")]
    Llm(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error from the relational record store.
    #[error("Store error: {0}")]
    Store(String),

    /// A token stream terminated abnormally.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Every attempt of a retried operation failed.
    #[error("{operation} failed after {} attempts: {}", .errors.len(), .errors.join("; "))]
    RetryExhausted {
        /// The operation that was retried.
        operation: String,
        /// The error of each attempt, in attempt order.
        errors: Vec<String>,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    /// Generic ownership failure that does not leak whether `what` exists.
    pub fn not_found_or_denied(what: impl std::fmt::Display) -> Self {
        RagError::Unauthorized(format!("{what} not found or no permission"))
    }

    /// Whether retrying the failed call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::VectorStore(_) | RagError::Http(_) | RagError::Io(_)
        )
    }

    /// Prefixes the message with the operation that produced it.
    ///
    /// Structured variants (`Json`, `Io`, `RetryExhausted`) are returned unchanged.
    pub fn context(self, operation: &str) -> Self {
        let wrap = |m: String| format!("[{operation}] {m}");
        match self {
            RagError::Config(m) => RagError::Config(wrap(m)),
            RagError::Validation(m) => RagError::Validation(wrap(m)),
            RagError::NotFound(m) => RagError::NotFound(wrap(m)),
            RagError::Unauthorized(m) => RagError::Unauthorized(m),
            RagError::AlreadyExists(m) => RagError::AlreadyExists(wrap(m)),
            RagError::VectorStore(m) => RagError::VectorStore(wrap(m)),
            RagError::Embedding(m) => RagError::Embedding(wrap(m)),
            RagError::Storage(m) => RagError::Storage(wrap(m)),
            RagError::Ingestion(m) => RagError::Ingestion(wrap(m)),
            RagError::Llm(m) => RagError::Llm(wrap(m)),
            RagError::Http(m) => RagError::Http(wrap(m)),
            RagError::Store(m) => RagError::Store(wrap(m)),
            RagError::Stream(m) => RagError::Stream(wrap(m)),
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_exhausted_lists_every_attempt() {
        let err = RagError::RetryExhausted {
            operation: "insert".into(),
            errors: vec!["timeout".into(), "refused".into(), "timeout".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("insert failed after 3 attempts"));
        assert!(text.contains("refused"));
    }

    #[test]
    fn test_context_prefixes_operation() {
        let err = RagError::VectorStore("boom".into()).context("VectorStore.search");
        assert_eq!(err.to_string(), "Vector store error: [VectorStore.search] boom");
    }

    #[test]
    fn test_unauthorized_message_is_generic() {
        let err = RagError::not_found_or_denied("knowledge base kb-1").context("retrieve");
        assert_eq!(
            err.to_string(),
            "Access denied: knowledge base kb-1 not found or no permission"
        );
    }

    #[test]
    fn test_retryable_classes() {
        assert!(RagError::VectorStore("x".into()).is_retryable());
        assert!(RagError::Http("x".into()).is_retryable());
        assert!(!RagError::Validation("x".into()).is_retryable());
        assert!(!RagError::Config("x".into()).is_retryable());
    }
}
