// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Agent Loop: drives a single user turn to a terminal state (spec
//! §4.6).
//!
//! # Example
//!
//! ```rust,ignore
//! use forge_core::agent::{Agent, AgentConfig};
//!
//! let mut agent = Agent::new(provider, registry, approval_engine, AgentConfig::default());
//! let outcome = agent.run_turn("list files in src", CancellationToken::new()).await;
//! ```

mod parser;
mod types;

pub use parser::{ParseEvent, ParsedToolCall, StreamParser};
pub use types::{AgentConfig, TurnOutcome, TurnState};

use std::sync::Arc;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::approval::ApprovalEngine;
use crate::context::ContextManager;
use crate::dispatcher::{new_call_id, Dispatcher};
use crate::error::ErrorKind;
use crate::events::{EventBus, EventKind, TurnFailureReason};
use crate::memory::MemoryStore;
use crate::tools::ToolRegistry;
use crate::types::{BoxedProvider, Message, StreamEvent, ToolCall, ToolDefinition, Usage, LOOP_TERMINATING_TOOLS};

const REMINDER_NO_TOOL_CALL: &str =
    "Reminder: no tool call was detected in your last message. If the task is complete, call \
     `task_completion`; otherwise invoke a tool using the <tool> wire syntax.";

/// Stable fingerprint of (tool name, error kind, canonicalised error text),
/// used to detect consecutive identical tool errors (spec §9, §4.6 step 10).
fn error_fingerprint(tool_name: &str, kind: ErrorKind, detail: &str) -> u64 {
    let canonical: String = detail.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("sha256 digest is at least 8 bytes"))
}

/// Orchestrates Memory, Context Manager, Dispatcher, and the Event Bus for
/// one conversation.
pub struct Agent {
    provider: Arc<BoxedProvider>,
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<Dispatcher>,
    memory: Arc<MemoryStore>,
    context: ContextManager,
    config: AgentConfig,
    system_prompt: String,
}

impl Agent {
    pub fn new(
        provider: BoxedProvider,
        registry: Arc<ToolRegistry>,
        approval: Arc<ApprovalEngine>,
        config: AgentConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        let provider = Arc::new(provider);
        let memory = Arc::new(MemoryStore::new());
        let context = ContextManager::new(memory.clone(), provider.clone(), config.max_context_tokens);
        Self {
            dispatcher: Arc::new(Dispatcher::new(registry.clone(), approval)),
            provider,
            registry,
            memory,
            context,
            config,
            system_prompt: system_prompt.into(),
        }
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// A cloneable handle onto the Dispatcher's suspend/resume machinery.
    /// Hosts use this to call `resolve_approval` from another task while
    /// `run_turn`'s `&mut self` borrow is still in flight — the two don't
    /// alias, since the handle only reaches the Dispatcher's own interior
    /// `Mutex`-guarded pending list.
    pub fn dispatcher_handle(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    /// Drives one user turn to completion, emitting the full event
    /// sequence spec §4.6 describes onto `events`.
    #[instrument(skip(self, events, cancel))]
    pub async fn run_turn(
        &mut self,
        user_message: impl Into<String>,
        events: &mut EventBus,
        cancel: CancellationToken,
    ) -> TurnOutcome {
        if self.memory.is_empty() {
            self.memory.append(Message::system(&self.system_prompt));
        }

        let user_msg = Message::user(user_message);
        events.emit(EventKind::UserMessageAccepted {
            message_id: user_msg.id.to_string(),
        });
        self.memory.append(user_msg);

        // Boundary case: max_iterations = 0 fails immediately, no LLM call
        // and no IterationStarted event (spec §8 boundary behaviours).
        if self.config.max_iterations == 0 {
            events.emit(EventKind::TurnFailed {
                reason: TurnFailureReason::IterationCap,
                detail: "max_iterations is 0".to_string(),
            });
            return TurnOutcome::Failed {
                reason: TurnFailureReason::IterationCap,
                detail: "max_iterations is 0".to_string(),
            };
        }

        let mut state = TurnState::default();
        let tool_defs: Vec<ToolDefinition> = self.registry.list().cloned().collect();

        loop {
            state.iteration += 1;

            if cancel.is_cancelled() {
                events.emit(EventKind::TurnCancelled);
                return TurnOutcome::Cancelled;
            }

            events.emit(EventKind::IterationStarted {
                iteration: state.iteration,
            });

            let (messages, _estimated_tokens) = self.context.build_prompt();

            let stream_result = self
                .provider
                .stream(&messages, Some(&tool_defs), Some(&self.system_prompt))
                .await;

            let mut token_stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    let detail = e.to_string();
                    events.emit(EventKind::TurnFailed {
                        reason: TurnFailureReason::ProviderError,
                        detail: detail.clone(),
                    });
                    return TurnOutcome::Failed {
                        reason: TurnFailureReason::ProviderError,
                        detail,
                    };
                }
            };

            events.emit(EventKind::LLMStreamStarted {
                iteration: state.iteration,
            });

            let mut parser = StreamParser::new();
            let mut assistant_text = String::new();
            let mut detected_call: Option<ParsedToolCall> = None;
            let mut protocol_error: Option<String> = None;
            let mut stream_error: Option<String> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        events.emit(EventKind::TurnCancelled);
                        return TurnOutcome::Cancelled;
                    }
                    next = token_stream.next() => {
                        match next {
                            Some(Ok(StreamEvent::TextDelta(text))) => {
                                for ev in parser.feed(&text) {
                                    match ev {
                                        ParseEvent::ThinkingDelta(t) => {
                                            events.emit(EventKind::ThinkingDelta { text: t });
                                        }
                                        ParseEvent::TextDelta(t) => {
                                            events.emit(EventKind::LLMTokenDelta { text: t.clone() });
                                            assistant_text.push_str(&t);
                                        }
                                        ParseEvent::ToolCallComplete(call) => {
                                            detected_call = Some(call);
                                        }
                                        ParseEvent::ProtocolError(msg) => {
                                            protocol_error = Some(msg);
                                        }
                                    }
                                }
                                if parser.is_done() {
                                    break;
                                }
                            }
                            Some(Ok(StreamEvent::Usage(u))) => {
                                accumulate_usage(&mut state.usage, u);
                            }
                            Some(Err(e)) => {
                                stream_error = Some(e.to_string());
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }

            events.emit(EventKind::LLMStreamEnded {
                iteration: state.iteration,
            });

            if let Some(detail) = stream_error {
                events.emit(EventKind::TurnFailed {
                    reason: TurnFailureReason::ProviderError,
                    detail: detail.clone(),
                });
                return TurnOutcome::Failed {
                    reason: TurnFailureReason::ProviderError,
                    detail,
                };
            }

            if let Some(detail) = protocol_error {
                events.emit(EventKind::TurnFailed {
                    reason: TurnFailureReason::ProtocolError,
                    detail: detail.clone(),
                });
                return TurnOutcome::Failed {
                    reason: TurnFailureReason::ProtocolError,
                    detail,
                };
            }

            let call = detected_call.map(|pc| ToolCall {
                id: new_call_id(),
                server: pc.server,
                name: pc.name,
                args: pc.args,
            });

            // O2: the Assistant-message append precedes its ToolCallDetected.
            self.memory
                .append(Message::assistant(assistant_text.clone(), call.clone()));

            if let Some(call) = &call {
                events.emit(EventKind::ToolCallDetected { call: call.clone() });
            }

            let Some(call) = call else {
                self.memory.append(Message::system(REMINDER_NO_TOOL_CALL));
                self.context.on_turn_boundary(events, &cancel).await;
                events.emit(EventKind::IterationCompleted {
                    iteration: state.iteration,
                });
                if state.iteration >= self.config.max_iterations {
                    events.emit(EventKind::TurnFailed {
                        reason: TurnFailureReason::IterationCap,
                        detail: format!("reached max_iterations={}", self.config.max_iterations),
                    });
                    return TurnOutcome::Failed {
                        reason: TurnFailureReason::IterationCap,
                        detail: format!("reached max_iterations={}", self.config.max_iterations),
                    };
                }
                continue;
            };

            if LOOP_TERMINATING_TOOLS.contains(&call.name.as_str()) {
                events.emit(EventKind::TurnCompleted);
                return TurnOutcome::Completed {
                    final_message: assistant_text,
                };
            }

            let tool_name = call.name.clone();
            let result = self.dispatcher.dispatch(call, events, &cancel).await;

            self.memory.append(Message::tool_reply(
                result.call_id.clone(),
                result.content.clone(),
                result.status,
                result.error_kind,
            ));

            // A call cancelled while awaiting human approval (spec §4.4
            // `Aborted`) ends the turn immediately: no error-budget
            // accounting and no further `IterationCompleted` for a call that
            // was never actually denied.
            if cancel.is_cancelled() {
                events.emit(EventKind::TurnCancelled);
                return TurnOutcome::Cancelled;
            }

            if result.status.is_error() {
                let kind = result.error_kind.unwrap_or(ErrorKind::Execution);
                let fingerprint = error_fingerprint(&tool_name, kind, &result.content);
                if state.last_error_fingerprint.as_deref() == Some(fingerprint.to_string().as_str()) {
                    state.identical_error_count += 1;
                } else {
                    state.identical_error_count = 1;
                }
                state.last_error_fingerprint = Some(fingerprint.to_string());

                if state.identical_error_count >= self.config.max_identical_errors {
                    events.emit(EventKind::ErrorBudgetExceeded {
                        tool: tool_name,
                        count: state.identical_error_count,
                    });
                    events.emit(EventKind::TurnFailed {
                        reason: TurnFailureReason::ErrorBudget,
                        detail: "identical tool error repeated past the budget".to_string(),
                    });
                    return TurnOutcome::Failed {
                        reason: TurnFailureReason::ErrorBudget,
                        detail: "identical tool error repeated past the budget".to_string(),
                    };
                }
            } else {
                state.identical_error_count = 0;
                state.last_error_fingerprint = None;
            }

            self.context.on_turn_boundary(events, &cancel).await;

            events.emit(EventKind::IterationCompleted {
                iteration: state.iteration,
            });

            if state.iteration >= self.config.max_iterations {
                events.emit(EventKind::TurnFailed {
                    reason: TurnFailureReason::IterationCap,
                    detail: format!("reached max_iterations={}", self.config.max_iterations),
                });
                return TurnOutcome::Failed {
                    reason: TurnFailureReason::IterationCap,
                    detail: format!("reached max_iterations={}", self.config.max_iterations),
                };
            }
        }
    }
}

fn accumulate_usage(total: &mut Usage, delta: Usage) {
    total.input_tokens += delta.input_tokens;
    total.output_tokens += delta.output_tokens;
    total.tool_tokens += delta.tool_tokens;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_fingerprint_is_stable_for_equivalent_text() {
        let a = error_fingerprint("execute_command", ErrorKind::Execution, "npm not found");
        let b = error_fingerprint("execute_command", ErrorKind::Execution, "  npm   not found  ");
        assert_eq!(a, b);
    }

    #[test]
    fn error_fingerprint_differs_by_tool_or_kind() {
        let a = error_fingerprint("execute_command", ErrorKind::Execution, "npm not found");
        let b = error_fingerprint("write_file", ErrorKind::Execution, "npm not found");
        let c = error_fingerprint("execute_command", ErrorKind::Timeout, "npm not found");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
