use crate::backends::LlmBackend;
use crate::config::AgentDefinition;
use crate::context::{grounded_query, ContextWindow};
use crate::llm::{LlmResponse, ToolCall, ToolSpec};
use crate::producer::{ChatInput, ChatProducer};
use crate::stream::FragmentStream;
use async_trait::async_trait;
use futures_util::stream;
use ragforge_core::{Fragment, Message, RagError, RagResult, Role};
use ragforge_knowledge::MultiKbRetriever;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Text handed back to the model.
    pub content: String,
    /// Set when the tool failed; the model sees the content as an error.
    pub is_error: bool,
}

/// Runs the tools an agent may call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools offered to the model.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Executes one call.
    async fn execute(&self, call: &ToolCall) -> RagResult<ToolOutput>;
}

/// An executor offering no tools.
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn execute(&self, call: &ToolCall) -> RagResult<ToolOutput> {
        Err(RagError::Validation(format!("unknown tool: {}", call.name)))
    }
}

/// The agent loop: retrieve, prompt, call tools, backfill, repeat.
pub struct AgentProducer {
    definition: AgentDefinition,
    backend: Arc<dyn LlmBackend>,
    retriever: Arc<MultiKbRetriever>,
    tools: Arc<dyn ToolExecutor>,
    user_id: String,
}

impl AgentProducer {
    /// Runs `definition` for `user_id`, retrieving from the agent's knowledge bases.
    pub fn new(
        definition: AgentDefinition,
        backend: Arc<dyn LlmBackend>,
        retriever: Arc<MultiKbRetriever>,
        tools: Arc<dyn ToolExecutor>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            definition,
            backend,
            retriever,
            tools,
            user_id: user_id.into(),
        }
    }

    async fn context(&self, input: &ChatInput) -> RagResult<ContextWindow> {
        let grounding = if input.grounding.is_empty() {
            self.retriever
                .retrieve(
                    &self.definition.kb_ids,
                    &self.user_id,
                    &input.query,
                    self.definition.top_k,
                )
                .await?
        } else {
            input.grounding.clone()
        };

        let mut ctx = ContextWindow::new(ragforge_session::DEFAULT_HISTORY_WINDOW * 2);
        ctx.set_system_prompt(self.definition.system_prompt.as_str());
        ctx.extend(input.history.iter().cloned());
        ctx.push(Message::user(grounded_query(&input.query, &grounding), ""));
        Ok(ctx)
    }

    /// Runs tool rounds until the model answers without tools.
    async fn run_loop(&self, ctx: &mut ContextWindow, tools: &[ToolSpec]) -> RagResult<String> {
        let agent_id = self.definition.id.as_str();
        info!(agent_id, tools = tools.len(), "Starting agent loop");

        for step in 0..self.definition.max_steps {
            let response = self
                .backend
                .chat(ctx.system_prompt(), ctx.messages(), tools)
                .await?;

            match response {
                LlmResponse::Done(text) => {
                    info!(agent_id, steps = step + 1, "Agent loop completed");
                    return Ok(text);
                }
                LlmResponse::ToolUse {
                    content,
                    tool_calls,
                } => {
                    if let Some(text) = content {
                        ctx.push(Message::assistant(text, ""));
                    }
                    for call in tool_calls {
                        info!(agent_id, step, tool = %call.name, call_id = %call.id, "Executing tool call");
                        let result = match self.tools.execute(&call).await {
                            Ok(output) => serde_json::json!({
                                "type": "tool_result",
                                "tool_use_id": call.id,
                                "content": output.content,
                                "is_error": output.is_error,
                            }),
                            Err(e) => {
                                error!(agent_id, tool = %call.name, error = %e, "Tool execution failed");
                                serde_json::json!({
                                    "type": "tool_result",
                                    "tool_use_id": call.id,
                                    "content": format!("Tool error: {e}"),
                                    "is_error": true,
                                })
                            }
                        };
                        ctx.push(Message::new(Role::Tool, result.to_string(), ""));
                    }
                }
            }
        }

        warn!(
            agent_id,
            max_steps = self.definition.max_steps,
            "Agent loop reached max steps"
        );
        Err(RagError::Llm(format!(
            "agent {agent_id} exceeded the maximum of {} steps",
            self.definition.max_steps
        )))
    }
}

#[async_trait]
impl ChatProducer for AgentProducer {
    async fn generate(&self, input: &ChatInput) -> RagResult<Message> {
        let mut ctx = self.context(input).await?;
        let tools = self.tools.tools();
        let text = self.run_loop(&mut ctx, &tools).await?;
        Ok(Message::assistant(text, ""))
    }

    /// Without tools the model streams directly. With tools, tool rounds run
    /// to completion first and the final answer is delivered as one fragment.
    async fn stream(&self, input: &ChatInput) -> RagResult<FragmentStream> {
        let mut ctx = self.context(input).await?;
        let tools = self.tools.tools();
        if tools.is_empty() {
            return self
                .backend
                .chat_stream(ctx.system_prompt(), ctx.messages())
                .await;
        }
        let text = self.run_loop(&mut ctx, &tools).await?;
        Ok(Box::pin(stream::once(async move {
            Ok(Fragment::assistant(text))
        })))
    }
}
