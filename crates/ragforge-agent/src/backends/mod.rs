/// OpenAI-compatible chat completions (also used for Ollama).
pub mod openai;

pub use openai::OpenAiBackend;

use crate::llm::{LlmResponse, ToolSpec};
use crate::stream::FragmentStream;
use async_trait::async_trait;
use ragforge_core::{Message, RagResult};

/// A chat model endpoint.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// One complete response, possibly asking for tool calls.
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> RagResult<LlmResponse>;

    /// The answer as a stream of text fragments.
    ///
    /// Fails before returning when the request itself is rejected; failures
    /// after the first byte arrive as an `Err` item on the stream.
    async fn chat_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> RagResult<FragmentStream>;
}
