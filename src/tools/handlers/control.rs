// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Handlers for the loop-terminating tools (spec GLOSSARY).
//!
//! The Agent Loop intercepts calls to these tools before dispatch (spec
//! §4.6 step 7) and never actually invokes `execute`; the handlers exist so
//! the tools have a complete [`crate::types::ToolDefinition`] and so tests
//! can exercise the registry without special-casing them.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::tools::ToolHandler;

pub struct TaskCompletionHandler;

#[async_trait]
impl ToolHandler for TaskCompletionHandler {
    async fn execute(&self, args: serde_json::Value, _cancel: CancellationToken) -> Result<String, String> {
        Ok(args
            .get("summary")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    fn deadline(&self) -> Option<std::time::Duration> {
        None
    }
}

pub struct AskQuestionHandler;

#[async_trait]
impl ToolHandler for AskQuestionHandler {
    async fn execute(&self, args: serde_json::Value, _cancel: CancellationToken) -> Result<String, String> {
        Ok(args
            .get("question")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    fn deadline(&self) -> Option<std::time::Duration> {
        None
    }
}

pub struct ConverseHandler;

#[async_trait]
impl ToolHandler for ConverseHandler {
    async fn execute(&self, args: serde_json::Value, _cancel: CancellationToken) -> Result<String, String> {
        Ok(args
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    fn deadline(&self) -> Option<std::time::Duration> {
        None
    }
}
