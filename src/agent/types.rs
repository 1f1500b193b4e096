// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent Loop configuration and per-turn state (spec §3 "Session State",
//! §4.6).

use crate::events::TurnFailureReason;
use crate::types::Usage;

/// Configurable bounds for one turn (spec §4.6).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub max_identical_errors: u32,
    /// Optional whole-turn deadline (spec §5); `None` means no global
    /// deadline beyond per-tool ones.
    pub turn_deadline: Option<std::time::Duration>,
    pub max_context_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            max_identical_errors: 5,
            turn_deadline: None,
            max_context_tokens: 100_000,
        }
    }
}

/// The terminal outcome of a turn (spec: "terminates deterministically in
/// exactly one of {TurnCompleted, TurnCancelled, TurnFailed}").
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed { final_message: String },
    Cancelled,
    Failed { reason: TurnFailureReason, detail: String },
}

/// Per-turn bookkeeping (spec §3 "Session State").
#[derive(Debug, Clone, Default)]
pub struct TurnState {
    pub iteration: u32,
    pub identical_error_count: u32,
    pub last_error_fingerprint: Option<String>,
    pub usage: Usage,
}
