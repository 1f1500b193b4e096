// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Schema-validated tool invocation, approval gating, timeout, and result
//! framing (spec §4.5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::approval::{ApprovalEngine, Decision, HumanDecision};
use crate::error::ErrorKind;
use crate::events::{EventBus, EventKind};
use crate::tools::ToolRegistry;
use crate::types::{ToolCall, ToolResult, ToolStatus};

/// Maximum bytes kept from a tool's output before truncation (spec §4.5:
/// "bounded; oversize results are truncated with a marker").
const MAX_RESULT_BYTES: usize = 64 * 1024;

/// A suspended call awaiting `resolve_approval` (spec §4.4, §6).
struct PendingApproval {
    call: ToolCall,
    resolver: oneshot::Sender<HumanDecision>,
}

/// Executes allowed tool calls; owns the approval suspend/resume machinery
/// the Approval Engine itself deliberately does not.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    approval: Arc<ApprovalEngine>,
    pending: Mutex<Vec<PendingApproval>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, approval: Arc<ApprovalEngine>) -> Self {
        Self {
            registry,
            approval,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Resolves a request previously surfaced via `ApprovalRequested`.
    pub async fn resolve_approval(&self, request_id: &str, decision: HumanDecision) -> bool {
        let mut pending = self.pending.lock().await;
        if let Some(idx) = pending.iter().position(|p| p.call.id == request_id) {
            let entry = pending.remove(idx);
            let _ = entry.resolver.send(decision);
            true
        } else {
            false
        }
    }

    /// Runs one call through validation, approval, and execution, emitting
    /// the full event sequence spec §8 requires: `ToolCallDetected` is
    /// emitted by the caller (the Agent Loop) before this is invoked;
    /// this method emits `ApprovalRequested`/`ApprovalResolved` (if the
    /// call suspends), then `ToolStarted`, then `ToolCompleted`.
    #[instrument(skip(self, call, events, cancel), fields(tool = %call.name))]
    pub async fn dispatch(
        &self,
        call: ToolCall,
        events: &mut EventBus,
        cancel: &CancellationToken,
    ) -> ToolResult {
        let start = Instant::now();

        let Some(def) = self.registry.lookup(&call.name) else {
            return ToolResult {
                call_id: call.id,
                status: ToolStatus::Err,
                content: format!("unknown tool {:?}", call.name),
                duration: start.elapsed(),
                error_kind: Some(ErrorKind::Execution),
            };
        };

        if let Err(schema_err) = self.registry.validate(def, &call.args) {
            return ToolResult {
                call_id: call.id,
                status: ToolStatus::Err,
                content: schema_err.to_string(),
                duration: start.elapsed(),
                error_kind: Some(ErrorKind::Schema),
            };
        }

        match self.approval.evaluate(&call, def) {
            Decision::AutoDeny { .. } => {
                return self.denied_result(call, start);
            }
            Decision::RequireHuman => match self.await_human(call.clone(), def, events, cancel).await {
                ApprovalWait::Decision(HumanDecision::Deny) => return self.denied_result(call, start),
                ApprovalWait::Decision(HumanDecision::Allow) => {}
                ApprovalWait::Aborted => return self.aborted_result(call, start),
            },
            Decision::AutoAllow { .. } => {}
        }

        events.emit(EventKind::ToolStarted {
            call_id: call.id.clone(),
        });

        let handler = def.handler.clone();
        let deadline = handler.deadline();
        let args = call.args.clone();
        let exec_cancel = cancel.child_token();

        let outcome = match deadline {
            Some(d) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ExecOutcome::Cancelled,
                    result = tokio::time::timeout(d, handler.execute(args, exec_cancel)) => match result {
                        Ok(Ok(content)) => ExecOutcome::Ok(content),
                        Ok(Err(detail)) => ExecOutcome::Err(detail),
                        Err(_) => ExecOutcome::TimedOut,
                    },
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ExecOutcome::Cancelled,
                    result = handler.execute(args, exec_cancel) => match result {
                        Ok(content) => ExecOutcome::Ok(content),
                        Err(detail) => ExecOutcome::Err(detail),
                    },
                }
            }
        };

        let result = self.frame_result(call.id.clone(), outcome, start);
        events.emit(EventKind::ToolCompleted {
            call_id: result.call_id.clone(),
            status: result.status,
        });
        result
    }

    async fn await_human(
        &self,
        call: ToolCall,
        _def: &crate::types::ToolDefinition,
        events: &mut EventBus,
        cancel: &CancellationToken,
    ) -> ApprovalWait {
        let request_id = call.id.clone();
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().await;
            pending.push(PendingApproval {
                call: call.clone(),
                resolver: tx,
            });
        }

        events.emit(EventKind::ApprovalRequested {
            request_id: request_id.clone(),
            call: call.clone(),
        });
        info!(request_id = %request_id, "awaiting human approval");

        // Spec §4.4: `Pending --Cancelled--> Aborted`. A cancellation here is
        // not a human denial, so it must not be recorded or reported as one.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let mut pending = self.pending.lock().await;
                pending.retain(|p| p.call.id != request_id);
                self.approval.record_aborted(&call, request_id);
                ApprovalWait::Aborted
            }
            resolved = rx => {
                let decision = resolved.unwrap_or(HumanDecision::Deny);
                self.approval.record_human_decision(&call, request_id.clone(), decision);
                events.emit(EventKind::ApprovalResolved {
                    request_id,
                    allowed: matches!(decision, HumanDecision::Allow),
                });
                ApprovalWait::Decision(decision)
            }
        }
    }

    fn denied_result(&self, call: ToolCall, start: Instant) -> ToolResult {
        ToolResult {
            call_id: call.id,
            status: ToolStatus::Denied,
            content: "tool call was denied".to_string(),
            duration: start.elapsed(),
            error_kind: Some(ErrorKind::Denied),
        }
    }

    /// Result for a call cancelled while still pending human approval (spec
    /// §4.4 `Aborted`). Distinct from `denied_result`: no one denied this
    /// call, the turn ended out from under it.
    fn aborted_result(&self, call: ToolCall, start: Instant) -> ToolResult {
        ToolResult {
            call_id: call.id,
            status: ToolStatus::Cancelled,
            content: "tool call aborted: turn was cancelled while awaiting approval".to_string(),
            duration: start.elapsed(),
            error_kind: Some(ErrorKind::Cancelled),
        }
    }

    fn frame_result(&self, call_id: String, outcome: ExecOutcome, start: Instant) -> ToolResult {
        let duration = start.elapsed();
        match outcome {
            ExecOutcome::Ok(content) => ToolResult {
                call_id,
                status: ToolStatus::Ok,
                content: truncate(content),
                duration,
                error_kind: None,
            },
            ExecOutcome::Err(detail) => {
                warn!(detail = %detail, "tool execution failed");
                ToolResult {
                    call_id,
                    status: ToolStatus::Err,
                    content: detail,
                    duration,
                    error_kind: Some(ErrorKind::Execution),
                }
            }
            ExecOutcome::TimedOut => ToolResult {
                call_id,
                status: ToolStatus::TimedOut,
                content: format!("tool call timed out after {duration:?}"),
                duration,
                error_kind: Some(ErrorKind::Timeout),
            },
            ExecOutcome::Cancelled => ToolResult {
                call_id,
                status: ToolStatus::Cancelled,
                content: "tool call cancelled".to_string(),
                duration,
                error_kind: Some(ErrorKind::Cancelled),
            },
        }
    }
}

enum ExecOutcome {
    Ok(String),
    Err(String),
    TimedOut,
    Cancelled,
}

/// Outcome of waiting on a suspended human-approval request: either it
/// resolved to a decision, or the turn was cancelled while it was still
/// pending (spec §4.4 `Aborted`).
enum ApprovalWait {
    Decision(HumanDecision),
    Aborted,
}

fn truncate(content: String) -> String {
    if content.len() <= MAX_RESULT_BYTES {
        return content;
    }
    let mut truncated = content.into_bytes();
    truncated.truncate(MAX_RESULT_BYTES);
    let mut s = String::from_utf8_lossy(&truncated).into_owned();
    s.push_str(&format!("\n... [truncated, {MAX_RESULT_BYTES} byte limit]"));
    s
}

/// Generates a fresh request id for a tool call, used by the streaming
/// parser when it mints a [`ToolCall`] (spec §3: "created by the streaming
/// parser").
pub fn new_call_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalRule;
    use crate::events::SessionId;
    use crate::tools::handlers::demo::ReadFileHandler;
    use crate::types::{ApprovalClass, OutputContract, SideEffect, ToolDefinition};
    use std::sync::Arc;

    fn registry() -> Arc<ToolRegistry> {
        let def = ToolDefinition {
            name: "read_file".into(),
            description: "reads a file".into(),
            args_schema: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
            output_contract: OutputContract::FileContent,
            side_effect: SideEffect::Read,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(ReadFileHandler::default()),
        };
        Arc::new(ToolRegistry::builder().register(def).unwrap().build().unwrap())
    }

    #[tokio::test]
    async fn schema_error_short_circuits_before_approval() {
        let dispatcher = Dispatcher::new(registry(), Arc::new(ApprovalEngine::new(vec![])));
        let mut bus = EventBus::new(SessionId::new(), 16);
        let cancel = CancellationToken::new();

        let call = ToolCall {
            id: "c1".into(),
            server: "fs".into(),
            name: "read_file".into(),
            args: serde_json::json!({}),
        };
        let result = dispatcher.dispatch(call, &mut bus, &cancel).await;
        assert_eq!(result.status, ToolStatus::Err);
        assert_eq!(result.error_kind, Some(ErrorKind::Schema));
    }

    #[tokio::test]
    async fn auto_deny_rule_produces_denied_result() {
        let rules = vec![ApprovalRule::tool_pattern(
            "deny-read",
            100,
            "read_file",
            crate::approval::RuleAction::Deny,
        )];
        let dispatcher = Dispatcher::new(registry(), Arc::new(ApprovalEngine::new(rules)));
        let mut bus = EventBus::new(SessionId::new(), 16);
        let cancel = CancellationToken::new();

        let call = ToolCall {
            id: "c1".into(),
            server: "fs".into(),
            name: "read_file".into(),
            args: serde_json::json!({"path": "x.txt"}),
        };
        let result = dispatcher.dispatch(call, &mut bus, &cancel).await;
        assert_eq!(result.status, ToolStatus::Denied);
    }
}
