use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;

use crate::agent_engine::memory::{ContentBlock, ConversationEntry, EntryContent, Role};
use crate::errors::{WebClawError, WebClawResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{
    CallConfig, ChatMessage, ChatRequest, FunctionCall, LlmResponse, MessageContent, StopReason,
    StreamChunkKind, TokenUsage, ToolCall,
};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            id,
            api_base,
            api_key,
            client,
        }
    }

    fn endpoint(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/chat/completions")
        }
    }
}

/// Flattens the conversation log into OpenAI chat messages.
///
/// Tool-use blocks become assistant `tool_calls`; each tool-result block
/// becomes its own `tool` message, followed by any user text of that entry.
pub fn to_openai_messages(system: &str, entries: &[ConversationEntry]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(entries.len() + 1);
    if !system.is_empty() {
        messages.push(ChatMessage::text("system", system));
    }

    for entry in entries {
        match (&entry.role, &entry.content) {
            (role, EntryContent::Text(text)) => messages.push(ChatMessage::text(role.as_str(), text.clone())),
            (Role::Assistant, EntryContent::Blocks(blocks)) => {
                let mut text = String::new();
                let mut calls = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: t } => text.push_str(t),
                        ContentBlock::ToolUse { id, name, input } => {
                            calls.push(ToolCall::function(id.clone(), name.clone(), input))
                        }
                        ContentBlock::ToolResult { .. } => {}
                    }
                }
                messages.push(ChatMessage {
                    role: "assistant".to_string(),
                    content: MessageContent::Text(text),
                    tool_call_id: None,
                    tool_calls: (!calls.is_empty()).then_some(calls),
                });
            }
            (Role::User, EntryContent::Blocks(blocks)) => {
                let mut text = String::new();
                for block in blocks {
                    match block {
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            let body = if *is_error {
                                format!("ERROR: {content}")
                            } else {
                                content.clone()
                            };
                            messages.push(ChatMessage {
                                role: "tool".to_string(),
                                content: MessageContent::Text(body),
                                tool_call_id: Some(tool_use_id.clone()),
                                tool_calls: None,
                            });
                        }
                        ContentBlock::Text { text: t } => {
                            if !text.is_empty() {
                                text.push('\n');
                            }
                            text.push_str(t);
                        }
                        ContentBlock::ToolUse { .. } => {}
                    }
                }
                if !text.is_empty() {
                    messages.push(ChatMessage::text("user", text));
                }
            }
        }
    }
    messages
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, request: ChatRequest, cfg: &CallConfig) -> WebClawResult<LlmResponse> {
        let messages = to_openai_messages(&request.system, &request.entries);
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
            "max_tokens": cfg.max_tokens,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::to_value(&request.tools)?;
            body["tool_choice"] = serde_json::json!("auto");
        }
        if let Some(budget) = request.thinking_budget.filter(|b| *b > 0) {
            body["reasoning"] = serde_json::json!({ "max_tokens": budget });
        }
        if cfg.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(WebClawError::LlmProvider(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulates an SSE stream into one response.
    async fn handle_stream(&self, response: reqwest::Response) -> WebClawResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        let mut lines = sse_parser::SseLineSplitter::new();

        let mut resp_content = String::new();
        let mut resp_reasoning = String::new();
        let mut finish_reason: Option<String> = None;
        let mut usage = TokenUsage::default();
        // Tool call accumulator: delta index → (id, type, name, accumulated_arguments)
        let mut tc_builders: BTreeMap<usize, (String, String, String, String)> = BTreeMap::new();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            for line in lines.push(&bytes) {
                match sse_parser::parse_sse_line(&line) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Reasoning => resp_reasoning.push_str(&chunk.content),
                        StreamChunkKind::Content => resp_content.push_str(&chunk.content),
                        StreamChunkKind::ToolCall => merge_tool_call_deltas(&chunk.content, &mut tc_builders),
                        StreamChunkKind::Finish => finish_reason = Some(chunk.content),
                        StreamChunkKind::Usage => {
                            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&chunk.content) {
                                usage = TokenUsage::from_openai(&v);
                            }
                        }
                        StreamChunkKind::Error => {
                            return Err(WebClawError::LlmProvider(chunk.content));
                        }
                        StreamChunkKind::Done => break 'stream,
                    },
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("SSE parse skipped: {e}");
                    }
                }
            }
        }

        let tool_calls = build_tool_calls(tc_builders);
        let stop_reason = resolve_stop_reason(finish_reason.as_deref(), !tool_calls.is_empty());

        tracing::info!(
            content_len = resp_content.len(),
            reasoning_len = resp_reasoning.len(),
            tool_calls = tool_calls.len(),
            stop_reason = ?stop_reason,
            "LLM stream complete"
        );

        Ok(LlmResponse {
            content: resp_content,
            reasoning: resp_reasoning,
            tool_calls,
            stop_reason,
            usage,
        })
    }

    async fn handle_json(&self, response: reqwest::Response) -> WebClawResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;
        let parsed = parse_completion(&json);
        tracing::info!(
            content_len = parsed.content.len(),
            tool_calls = parsed.tool_calls.len(),
            stop_reason = ?parsed.stop_reason,
            "LLM JSON response received"
        );
        Ok(parsed)
    }
}

fn resolve_stop_reason(finish_reason: Option<&str>, has_tool_calls: bool) -> StopReason {
    match finish_reason.filter(|r| !r.is_empty()).map(StopReason::from_finish_reason) {
        Some(reason) => reason,
        None if has_tool_calls => StopReason::ToolUse,
        None => StopReason::EndTurn,
    }
}

/// Parses a non-streaming chat completion body.
pub fn parse_completion(json: &serde_json::Value) -> LlmResponse {
    let message = &json["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();
    let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

    let tool_calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .map(|tc| ToolCall {
                    id: tc["id"].as_str().unwrap_or("").to_string(),
                    call_type: tc["type"].as_str().unwrap_or("function").to_string(),
                    function: FunctionCall {
                        name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                        arguments: tc["function"]["arguments"].as_str().unwrap_or("{}").to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default();

    let stop_reason = resolve_stop_reason(json["choices"][0]["finish_reason"].as_str(), !tool_calls.is_empty());

    LlmResponse {
        content,
        reasoning,
        tool_calls,
        stop_reason,
        usage: TokenUsage::from_openai(&json["usage"]),
    }
}

/// Merge streaming tool-call delta fragments into the accumulator map (keyed by delta index).
fn merge_tool_call_deltas(
    chunk_content: &str,
    builders: &mut BTreeMap<usize, (String, String, String, String)>,
) {
    let Ok(deltas) = serde_json::from_str::<Vec<serde_json::Value>>(chunk_content) else {
        return;
    };
    for delta in deltas {
        let idx = delta["index"].as_u64().unwrap_or(0) as usize;
        let entry = builders.entry(idx).or_default();

        if let Some(id) = delta["id"].as_str().filter(|s| !s.is_empty()) {
            entry.0 = id.to_string();
        }
        if let Some(t) = delta["type"].as_str().filter(|s| !s.is_empty()) {
            entry.1 = t.to_string();
        }
        if let Some(name) = delta["function"]["name"].as_str() {
            entry.2.push_str(name);
        }
        if let Some(args) = delta["function"]["arguments"].as_str() {
            entry.3.push_str(args);
        }
    }
}

fn build_tool_calls(builders: BTreeMap<usize, (String, String, String, String)>) -> Vec<ToolCall> {
    builders
        .into_values()
        .filter(|(_, _, name, _)| !name.is_empty())
        .map(|(id, call_type, name, arguments)| ToolCall {
            id,
            call_type: if call_type.is_empty() {
                "function".to_string()
            } else {
                call_type
            },
            function: FunctionCall { name, arguments },
        })
        .collect()
}
