// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::tools::ToolHandler;

/// A parsed tool invocation: `<tool><server>S</server><n>N</n><args>{...}</args></tool>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub server: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Outcome status of a dispatched tool call (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolStatus {
    Ok,
    Err,
    Denied,
    TimedOut,
    Cancelled,
}

impl ToolStatus {
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Full lifecycle result of a dispatched tool call, owned by the Dispatcher
/// until it is folded into a Tool [`crate::types::Message`].
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub call_id: String,
    pub status: ToolStatus,
    pub content: String,
    pub duration: Duration,
    pub error_kind: Option<ErrorKind>,
}

/// Declared shape of a tool's output, used by front ends to pick a renderer;
/// the core only threads the tag through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContract {
    FileContent,
    Diff,
    CommandOutput,
    Structured,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    Read,
    Write,
    Execute,
    PurelyInternal,
}

/// A tool's declared approval policy (spec §4.4): `always` forces
/// `RequireHuman` regardless of rules, `never` auto-allows, and `rule_gated`
/// defers entirely to the Approval Engine's rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalClass {
    Always,
    Never,
    RuleGated,
}

/// Tools whose invocation ends the current turn without further iterations
/// (spec GLOSSARY: "loop-terminating tool").
pub const LOOP_TERMINATING_TOOLS: &[&str] = &["task_completion", "ask_question", "converse"];

/// Immutable catalogue entry for one tool (spec §3, §4.3).
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub args_schema: serde_json::Value,
    pub output_contract: OutputContract,
    pub side_effect: SideEffect,
    pub approval_class: ApprovalClass,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("output_contract", &self.output_contract)
            .field("side_effect", &self.side_effect)
            .field("approval_class", &self.approval_class)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    pub fn is_loop_terminating(&self) -> bool {
        LOOP_TERMINATING_TOOLS.contains(&self.name.as_str())
    }
}
