// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Deterministic test double for [`forge_core::types::Provider`], used by
//! the integration scenarios instead of any real network call.

use std::sync::Mutex;

use async_trait::async_trait;
use forge_core::error::Result;
use forge_core::types::{
    CompletionResponse, Message, Provider, StreamEvent, TokenStream, ToolDefinition, Usage,
};

/// One scripted reply: raw assistant text (may embed a `<tool>` block),
/// played back verbatim as a single `StreamEvent::TextDelta`.
pub struct ScriptedReply {
    pub text: String,
}

impl ScriptedReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn tool_call(server: &str, name: &str, args: serde_json::Value) -> Self {
        Self {
            text: format!(
                "<tool><server>{server}</server><n>{name}</n><args>{}</args></tool>",
                args
            ),
        }
    }
}

/// Replays a fixed sequence of [`ScriptedReply`] values, one per call to
/// `stream`/`complete`, looping on the last entry if exhausted.
pub struct FakeProvider {
    replies: Mutex<Vec<ScriptedReply>>,
    cursor: Mutex<usize>,
}

impl FakeProvider {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            cursor: Mutex::new(0),
        }
    }

    fn next_text(&self) -> String {
        let replies = self.replies.lock().unwrap();
        let mut cursor = self.cursor.lock().unwrap();
        let idx = (*cursor).min(replies.len().saturating_sub(1));
        *cursor += 1;
        replies.get(idx).map(|r| r.text.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-model"
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _system: Option<&str>,
    ) -> Result<CompletionResponse> {
        Ok(CompletionResponse {
            content: self.next_text(),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 10,
                tool_tokens: 0,
            }),
        })
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
        _system: Option<&str>,
    ) -> Result<TokenStream> {
        let text = self.next_text();
        let events: Vec<Result<StreamEvent>> = vec![Ok(StreamEvent::TextDelta(text))];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn estimate_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| m.content.split_whitespace().count()).sum()
    }
}
