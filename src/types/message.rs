// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tool::{ToolCall, ToolStatus};
use crate::error::ErrorKind;

/// Opaque message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four message roles named in spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A string-keyed map of scalar metadata values (spec: "optional metadata
/// map (string→scalar)"). Compaction tags live here, e.g. `summarized=true`.
pub type Metadata = HashMap<String, serde_json::Value>;

/// The variant-specific payload carried alongside a message's role and
/// textual content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MessagePayload {
    /// No structured payload (System/User messages, or an Assistant message
    /// with no tool call).
    None,
    /// An Assistant message's parsed tool invocation.
    ToolCall(ToolCall),
    /// A Tool message answering a prior call.
    ToolReply {
        call_id: String,
        status: ToolStatus,
        error_kind: Option<ErrorKind>,
    },
}

/// A single conversation message.
///
/// Invariant (enforced by [`crate::memory::MemoryStore`], not here): a Tool
/// message always follows the Assistant message whose call it answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default = "default_payload")]
    pub payload: MessagePayload,
}

fn default_payload() -> MessagePayload {
    MessagePayload::None
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, MessagePayload::None)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessagePayload::None)
    }

    pub fn assistant(content: impl Into<String>, tool_call: Option<ToolCall>) -> Self {
        let payload = match tool_call {
            Some(call) => MessagePayload::ToolCall(call),
            None => MessagePayload::None,
        };
        Self::new(Role::Assistant, content, payload)
    }

    pub fn tool_reply(
        call_id: impl Into<String>,
        content: impl Into<String>,
        status: ToolStatus,
        error_kind: Option<ErrorKind>,
    ) -> Self {
        Self::new(
            Role::Tool,
            content,
            MessagePayload::ToolReply {
                call_id: call_id.into(),
                status,
                error_kind,
            },
        )
    }

    fn new(role: Role, content: impl Into<String>, payload: MessagePayload) -> Self {
        Self {
            id: MessageId::new(),
            timestamp: Utc::now(),
            role,
            content: content.into(),
            metadata: Metadata::new(),
            payload,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The parsed tool call, if this is an Assistant message carrying one.
    pub fn tool_call(&self) -> Option<&ToolCall> {
        match &self.payload {
            MessagePayload::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    /// The id of the call this Tool message answers, if any.
    pub fn tool_reply_to(&self) -> Option<&str> {
        match &self.payload {
            MessagePayload::ToolReply { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        }
    }

    pub fn is_summarized(&self) -> bool {
        self.metadata
            .get("summarized")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Heuristic used by S2 (spec §4.2): an Assistant message that embeds a
    /// raw `<tool>...</tool>` wire block in its content (rather than having
    /// already been parsed into `MessagePayload::ToolCall`) still counts as
    /// tool-related for batching purposes.
    pub fn looks_tool_related(&self) -> bool {
        matches!(self.role, Role::Tool)
            || self.tool_call().is_some()
            || (self.role == Role::Assistant
                && self.content.contains("<tool>")
                && self.content.contains("</tool>"))
    }
}
