// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Value types shared by every subsystem: messages, tool calls, tool
//! definitions, and the provider-facing completion/streaming types.
//!
//! These are intentionally plain data — the invariants that govern how they
//! compose (e.g. "a tool message always follows the assistant message whose
//! call it answers") live in [`crate::memory`], not here.

mod message;
mod tool;

pub use message::{Message, MessageId, MessagePayload, Metadata, Role};
pub use tool::{
    ApprovalClass, OutputContract, SideEffect, ToolCall, ToolDefinition, ToolResult, ToolStatus,
    LOOP_TERMINATING_TOOLS,
};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Token usage reported by a provider for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub tool_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.tool_tokens
    }
}

/// Non-streaming completion result, used for the LLM calls compaction
/// strategies make (spec §4.2) where early tool-call detection is moot.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// One chunk of a streaming completion. The provider yields raw text;
/// recognising `<thinking>` / `<tool>` tags within that text is the agent
/// loop's job (spec §4.6 step 4), not the provider's.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    Usage(Usage),
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Configuration needed to construct a provider instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub max_output_tokens: Option<u32>,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            model: Some(model.into()),
            base_url: None,
            max_output_tokens: None,
        }
    }
}

/// The consumed interface to an LLM provider (spec §6). The core makes no
/// assumption about the wire protocol beyond this trait.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn supports_tool_use(&self) -> bool;

    /// Non-streaming completion, used by compaction's summarisation calls.
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system: Option<&str>,
    ) -> Result<CompletionResponse>;

    /// Streaming completion used by the agent loop's main iteration.
    async fn stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        system: Option<&str>,
    ) -> Result<TokenStream>;

    /// Estimate of token count for a message slice; spec requires this to
    /// correlate within 5% of the provider's real count.
    fn estimate_tokens(&self, messages: &[Message]) -> usize;
}

pub type BoxedProvider = Box<dyn Provider>;
