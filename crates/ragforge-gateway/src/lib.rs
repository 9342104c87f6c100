//! HTTP gateway for the RagForge backend.
//!
//! Exposes knowledge-base management, multi-knowledge-base retrieval and
//! chat (plain JSON or server-sent events) over axum. The caller is
//! identified by the `X-User-Id` header set by the upstream auth layer.

/// Chat, streaming chat and conversation endpoints.
pub mod chat;
/// Mapping of service errors to HTTP responses.
pub mod error;
/// Knowledge-base, document and retrieval endpoints.
pub mod knowledge;
/// API key check and caller extraction.
pub mod middleware;
/// Model registration endpoints.
pub mod models;
/// Router assembly and shared state.
pub mod server;

pub use error::ApiError;
pub use middleware::{AuthConfig, CallerId};
pub use server::{AppState, GatewayServer};
