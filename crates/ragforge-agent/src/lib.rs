//! Answer generation and streaming execution for RagForge.
//!
//! # Main types
//!
//! - [`LlmBackend`] / [`OpenAiBackend`]: Chat model access, including SSE token streaming.
//! - [`ChatProducer`]: Turns a query plus history and grounding into a message or a fragment stream.
//! - [`RagAnswerProducer`] / [`AgentProducer`]: Direct grounded answers and the tool-calling agent loop.
//! - [`StreamTee`]: Fans one fragment stream out to independent cursors.
//! - [`StreamingController`]: Debug and conversation mode execution with detached persistence.

/// Chat model backends.
pub mod backends;
/// LLM and agent configuration.
pub mod config;
/// Prompt assembly.
pub mod context;
/// Debug and conversation mode execution.
pub mod controller;
/// LLM response types and the backend registry.
pub mod llm;
/// The chat producer capability and the direct RAG producer.
pub mod producer;
/// The tool-calling agent producer.
pub mod runner;
/// Fragment streams and the stream tee.
pub mod stream;

pub use backends::{LlmBackend, OpenAiBackend};
pub use config::{AgentDefinition, LlmSettings};
pub use context::ContextWindow;
pub use controller::{ChatRequest, ChatStream, StreamingController};
pub use llm::{LlmRegistry, LlmResponse, ToolCall, ToolSpec};
pub use producer::{ChatInput, ChatProducer, RagAnswerProducer};
pub use runner::{AgentProducer, NoTools, ToolExecutor, ToolOutput};
pub use stream::{FragmentStream, StreamTee};
