use super::LlmBackend;
use crate::config::LlmSettings;
use crate::llm::{LlmResponse, ToolCall, ToolSpec};
use crate::stream::FragmentStream;
use async_trait::async_trait;
use futures_util::StreamExt;
use ragforge_core::{Fragment, Message, RagError, RagResult, Role};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// OpenAI-compatible chat completions backend.
///
/// Works with OpenAI, Ollama's `/v1` endpoint, vLLM and any other server
/// implementing the same API.
pub struct OpenAiBackend {
    settings: LlmSettings,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Fails with `Config` when no model is set or the client cannot be built.
    pub fn new(settings: LlmSettings) -> RagResult<Self> {
        if settings.model.is_empty() {
            return Err(RagError::Config("LLM model name cannot be empty".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("cannot build LLM HTTP client: {e}")))?;
        Ok(Self { settings, http })
    }

    fn build_messages(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::with_capacity(messages.len() + 1);

        if let Some(sys) = system_prompt.filter(|s| !s.is_empty()) {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in messages {
            let role = match m.role {
                Role::System => continue,
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            api_messages.push(serde_json::json!({
                "role": role,
                "content": m.content
            }));
        }

        api_messages
    }

    fn build_tools(&self, tools: &[ToolSpec]) -> Vec<serde_json::Value> {
        tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema,
                    }
                })
            })
            .collect()
    }

    async fn post(&self, body: &serde_json::Value) -> RagResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.settings.base_url());
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if !self.settings.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.settings.api_key));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| RagError::Http(format!("chat request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            let error_body = resp
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(RagError::Llm(format!("LLM API error {status}: {error_body}")));
        }
        Ok(resp)
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> RagResult<LlmResponse> {
        let mut body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": self.build_messages(system_prompt, messages),
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::json!(self.build_tools(tools));
        }

        let resp_body: serde_json::Value = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| RagError::Llm(format!("invalid chat response: {e}")))?;
        parse_openai_response(&resp_body)
    }

    async fn chat_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> RagResult<FragmentStream> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
            "messages": self.build_messages(system_prompt, messages),
            "stream": true,
        });
        let resp = self.post(&body).await?;

        let (tx, rx) = mpsc::channel::<RagResult<Fragment>>(256);
        let mut byte_stream = resp.bytes_stream();

        tokio::spawn(async move {
            // Raw bytes; a multi-byte character may span two network chunks.
            let mut buffer: Vec<u8> = Vec::new();
            let mut sent = 0usize;
            let mut finished = false;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(RagError::Stream(format!("stream read error: {e}"))))
                            .await;
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();

                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Fragment(fragment, last) => {
                            sent += 1;
                            finished |= last;
                            if tx.send(Ok(fragment)).await.is_err() {
                                debug!(sent, "Stream reader dropped; closing LLM stream");
                                return;
                            }
                        }
                        SseLine::Finished => finished = true,
                        SseLine::Done => {
                            debug!(sent, "LLM stream finished");
                            return;
                        }
                        SseLine::Failed(message) => {
                            warn!(error = %message, "LLM stream reported an error");
                            let _ = tx.send(Err(RagError::Llm(message))).await;
                            return;
                        }
                    }
                }
            }

            match parse_sse_line(String::from_utf8_lossy(&buffer).trim()) {
                SseLine::Done | SseLine::Finished => finished = true,
                SseLine::Fragment(fragment, last) => {
                    finished |= last;
                    let _ = tx.send(Ok(fragment)).await;
                }
                SseLine::Failed(message) => {
                    let _ = tx.send(Err(RagError::Llm(message))).await;
                    return;
                }
                SseLine::Skip => {}
            }
            if !finished {
                let _ = tx
                    .send(Err(RagError::Stream(
                        "LLM stream ended before completion".into(),
                    )))
                    .await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

enum SseLine {
    Skip,
    /// A delta; the flag is set when the same event carries a finish reason.
    Fragment(Fragment, bool),
    /// A finish reason without content.
    Finished,
    /// The `[DONE]` sentinel.
    Done,
    Failed(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let event: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return SseLine::Skip,
    };
    if let Some(error) = event.get("error") {
        let message = error["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return SseLine::Failed(message);
    }

    let choice = &event["choices"][0];
    let delta = &choice["delta"];
    let content = delta["content"].as_str().unwrap_or_default();
    let role = delta["role"].as_str().and_then(Role::parse);
    let finished = choice["finish_reason"].is_string();
    if !content.is_empty() || role.is_some() {
        return SseLine::Fragment(
            Fragment {
                role,
                content: content.to_string(),
            },
            finished,
        );
    }
    if finished {
        return SseLine::Finished;
    }
    SseLine::Skip
}

/// Parses a non-streaming chat completions body.
pub fn parse_openai_response(body: &serde_json::Value) -> RagResult<LlmResponse> {
    let message = &body["choices"][0]["message"];
    if message.is_null() {
        return Err(RagError::Llm(format!("chat response has no message: {body}")));
    }
    let content = message["content"].as_str().unwrap_or_default().to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(position, tc)| {
                    let name = tc["function"]["name"].as_str()?.to_string();
                    let id = tc["id"]
                        .as_str()
                        .map(String::from)
                        .unwrap_or_else(|| format!("call_{position}"));
                    let arguments = tc["function"]["arguments"]
                        .as_str()
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_default();
                    Some(ToolCall {
                        id,
                        name,
                        arguments,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if tool_calls.is_empty() {
        Ok(LlmResponse::Done(content))
    } else {
        Ok(LlmResponse::ToolUse {
            content: Some(content).filter(|c| !c.is_empty()),
            tool_calls,
        })
    }
}
