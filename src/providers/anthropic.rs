// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Anthropic Messages API provider.
//!
//! The wire protocol is explicitly out of core scope (only the consumed
//! `complete`/`stream`/`estimate_tokens` interface is). This implementation
//! is a reference transport, not a conformance target.

use std::pin::Pin;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::Stream;
use once_cell::sync::OnceCell;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ForgeError, Result};
use crate::types::{
    CompletionResponse, Message, MessagePayload, Provider, ProviderConfig, Role, StreamEvent, TokenStream,
    ToolDefinition, Usage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    model: String,
    base_url: String,
    max_output_tokens: u32,
    client: Client,
    encoder: OnceCell<tiktoken_rs::CoreBPE>,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: String, config: ProviderConfig) -> Self {
        Self {
            api_key,
            model,
            base_url,
            max_output_tokens: config.max_output_tokens.unwrap_or(4096),
            client: Client::new(),
            encoder: OnceCell::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, messages: &[Message], tools: Option<&[ToolDefinition]>, system: Option<&str>, stream: bool) -> serde_json::Value {
        let (system_text, wire_messages) = to_wire_messages(messages, system);

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": wire_messages,
            "stream": stream,
        });

        if let Some(system_text) = system_text {
            body["system"] = json!(system_text);
        }

        if let Some(tools) = tools {
            body["tools"] = json!(tools.iter().map(tool_to_wire).collect::<Vec<_>>());
        }

        body
    }

    fn encoder(&self) -> &tiktoken_rs::CoreBPE {
        self.encoder
            .get_or_init(|| tiktoken_rs::cl100k_base().expect("cl100k_base encoding is always available"))
    }
}

fn tool_to_wire(def: &ToolDefinition) -> serde_json::Value {
    json!({
        "name": def.name,
        "description": def.description,
        "input_schema": def.args_schema,
    })
}

/// Converts our `Message` log into Anthropic's `(system, messages[])` shape.
/// Tool replies become `tool_result` blocks in a user-role message; an
/// assistant tool call becomes a `tool_use` block.
fn to_wire_messages(messages: &[Message], system_override: Option<&str>) -> (Option<String>, Vec<serde_json::Value>) {
    let mut system = system_override.map(str::to_string);
    let mut wire = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                if system.is_none() {
                    system = Some(msg.content.clone());
                }
            }
            Role::User => wire.push(json!({"role": "user", "content": msg.content})),
            Role::Assistant => {
                let mut content = Vec::new();
                if !msg.content.is_empty() {
                    content.push(json!({"type": "text", "text": msg.content}));
                }
                if let MessagePayload::ToolCall(call) = &msg.payload {
                    content.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": call.args,
                    }));
                }
                wire.push(json!({"role": "assistant", "content": content}));
            }
            Role::Tool => {
                if let MessagePayload::ToolReply { call_id, .. } = &msg.payload {
                    wire.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": call_id,
                            "content": msg.content,
                        }],
                    }));
                }
            }
        }
    }

    (system, wire)
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "Anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system: Option<&str>,
    ) -> Result<CompletionResponse> {
        let body = self.request_body(messages, tools, system, false);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::ProviderError(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ForgeError::ProviderError(format!("{status}: {text}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::ProviderError(format!("malformed response: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|b| match b {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed.usage.map(|u| Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            tool_tokens: 0,
        });

        Ok(CompletionResponse { content, usage })
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system: Option<&str>,
    ) -> Result<TokenStream> {
        let body = self.request_body(messages, tools, system, true);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::ProviderError(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ForgeError::ProviderError(format!("{status}: {text}")));
        }

        let stream: Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>> = Box::pin(try_stream! {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = futures::StreamExt::next(&mut byte_stream).await {
                let chunk = chunk.map_err(|e| ForgeError::ProviderError(format!("stream read failed: {e}")))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(idx) = buffer.find("\n\n") {
                    let event: String = buffer.drain(..idx + 2).collect();
                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data: ") else { continue };
                        if data == "[DONE]" {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(data) {
                            Ok(value) => {
                                if let Some(event) = parse_sse_event(&value) {
                                    yield event;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "skipping malformed SSE payload");
                            }
                        }
                    }
                }
            }
        });

        Ok(stream)
    }

    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let joined: String = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
        self.encoder().encode_with_special_tokens(&joined).len()
    }
}

/// Maps one parsed Anthropic SSE event into our provider-facing
/// [`StreamEvent`], or `None` for event types we don't surface (message
/// start/stop, ping).
fn parse_sse_event(value: &serde_json::Value) -> Option<StreamEvent> {
    match value.get("type").and_then(|t| t.as_str())? {
        "content_block_delta" => {
            let text = value.get("delta")?.get("text")?.as_str()?;
            Some(StreamEvent::TextDelta(text.to_string()))
        }
        "message_delta" => {
            let usage = value.get("usage")?;
            let output_tokens = usage.get("output_tokens")?.as_u64().unwrap_or(0);
            Some(StreamEvent::Usage(Usage {
                input_tokens: 0,
                output_tokens,
                tool_tokens: 0,
            }))
        }
        _ => {
            debug!(kind = ?value.get("type"), "ignoring SSE event type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_is_hoisted_out_of_the_wire_message_array() {
        let messages = vec![Message::system("be helpful"), Message::user("hi")];
        let (system, wire) = to_wire_messages(&messages, None);
        assert_eq!(system.as_deref(), Some("be helpful"));
        assert_eq!(wire.len(), 1);
    }

    #[test]
    fn parses_text_delta_event() {
        let value = json!({
            "type": "content_block_delta",
            "delta": {"type": "text_delta", "text": "hello"}
        });
        let event = parse_sse_event(&value).unwrap();
        assert!(matches!(event, StreamEvent::TextDelta(t) if t == "hello"));
    }

    #[test]
    fn ignores_unknown_event_types() {
        let value = json!({"type": "ping"});
        assert!(parse_sse_event(&value).is_none());
    }
}
