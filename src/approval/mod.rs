// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule evaluator and suspendable human-decision state machine (spec §3
//! "Approval Rule"/"Approval Record", §4.4).

use globset::Glob;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::types::{ApprovalClass, ToolCall, ToolDefinition};

#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("invalid command pattern {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("approval request {0} is not pending")]
    NotPending(String),
}

/// Allow/Deny outcome a matched rule resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Deny,
}

/// One predicate over (tool, arguments) (spec §3 "Approval Rule").
pub enum ApprovalRule {
    ToolPattern {
        id: String,
        priority: i32,
        enabled: bool,
        name: String,
        action: RuleAction,
    },
    PathGlob {
        id: String,
        priority: i32,
        enabled: bool,
        glob: Glob,
        arg_key: String,
        action: RuleAction,
    },
    CommandPattern {
        id: String,
        priority: i32,
        enabled: bool,
        regex: Regex,
        arg_key: String,
        action: RuleAction,
    },
    Composite {
        id: String,
        priority: i32,
        enabled: bool,
        predicates: Vec<ApprovalRule>,
        action: RuleAction,
    },
}

impl ApprovalRule {
    pub fn tool_pattern(
        id: impl Into<String>,
        priority: i32,
        name: impl Into<String>,
        action: RuleAction,
    ) -> Self {
        Self::ToolPattern {
            id: id.into(),
            priority,
            enabled: true,
            name: name.into(),
            action,
        }
    }

    pub fn path_glob(
        id: impl Into<String>,
        priority: i32,
        pattern: &str,
        arg_key: impl Into<String>,
        action: RuleAction,
    ) -> Result<Self, ApprovalError> {
        let glob = Glob::new(pattern).map_err(|source| ApprovalError::InvalidGlob {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self::PathGlob {
            id: id.into(),
            priority,
            enabled: true,
            glob,
            arg_key: arg_key.into(),
            action,
        })
    }

    pub fn command_pattern(
        id: impl Into<String>,
        priority: i32,
        pattern: &str,
        arg_key: impl Into<String>,
        action: RuleAction,
    ) -> Result<Self, ApprovalError> {
        let regex = Regex::new(pattern).map_err(|source| ApprovalError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self::CommandPattern {
            id: id.into(),
            priority,
            enabled: true,
            regex,
            arg_key: arg_key.into(),
            action,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Self::ToolPattern { id, .. }
            | Self::PathGlob { id, .. }
            | Self::CommandPattern { id, .. }
            | Self::Composite { id, .. } => id,
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            Self::ToolPattern { priority, .. }
            | Self::PathGlob { priority, .. }
            | Self::CommandPattern { priority, .. }
            | Self::Composite { priority, .. } => *priority,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::ToolPattern { enabled, .. }
            | Self::PathGlob { enabled, .. }
            | Self::CommandPattern { enabled, .. }
            | Self::Composite { enabled, .. } => *enabled,
        }
    }

    pub fn action(&self) -> RuleAction {
        match self {
            Self::ToolPattern { action, .. }
            | Self::PathGlob { action, .. }
            | Self::CommandPattern { action, .. }
            | Self::Composite { action, .. } => *action,
        }
    }

    fn matches(&self, call: &ToolCall) -> bool {
        match self {
            Self::ToolPattern { name, .. } => &call.name == name,
            Self::PathGlob { glob, arg_key, .. } => call
                .args
                .get(arg_key)
                .and_then(|v| v.as_str())
                .map(|path| glob.compile_matcher().is_match(path))
                .unwrap_or(false),
            Self::CommandPattern { regex, arg_key, .. } => call
                .args
                .get(arg_key)
                .and_then(|v| v.as_str())
                .map(|cmd| regex.is_match(cmd))
                .unwrap_or(false),
            Self::Composite { predicates, .. } => predicates.iter().all(|p| p.matches(call)),
        }
    }
}

/// Outcome of [`ApprovalEngine::evaluate`] (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    AutoAllow { rule_id: Option<String> },
    AutoDeny { rule_id: Option<String> },
    RequireHuman,
}

/// A human's resolution of a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumanDecision {
    Allow,
    Deny,
}

/// Decision recorded at evaluation time (spec §3 "Approval Record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedDecision {
    AutoAllow,
    AutoDeny,
    HumanAllow,
    HumanDeny,
    Timeout,
    /// The call was cancelled while still `Pending` (spec §4.4: `Pending
    /// --Cancelled--> Aborted`). Distinct from `HumanDeny`: no human ever
    /// denied the call, the turn was cancelled out from under it.
    Aborted,
}

#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub request_id: String,
    pub tool_name: String,
    pub matched_rule_id: Option<String>,
    pub decision: RecordedDecision,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// State of a single call as it moves through the approval machine (spec
/// §4.4 state diagram).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalState {
    Pending,
    Allowed,
    Denied,
    Aborted,
}

/// Rule evaluator plus an append-only audit log.
///
/// The engine itself never suspends: a `RequireHuman` result is carried back
/// to the Dispatcher, which owns the actual suspend/resume machinery (spec
/// §4.4: "Suspends only outside itself").
pub struct ApprovalEngine {
    rules: Vec<ApprovalRule>,
    audit_log: std::sync::Mutex<Vec<ApprovalRecord>>,
}

impl ApprovalEngine {
    pub fn new(rules: Vec<ApprovalRule>) -> Self {
        Self {
            rules,
            audit_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Rule evaluation order (spec §4.4): enabled Deny rules by descending
    /// priority, then enabled Allow rules by descending priority, then the
    /// tool's declared approval class, then fallback `RequireHuman`. Ties
    /// within a priority class break by registration order.
    #[instrument(skip(self, call, tool_def), fields(tool = %call.name))]
    pub fn evaluate(&self, call: &ToolCall, tool_def: &ToolDefinition) -> Decision {
        let decision = self.evaluate_inner(call, tool_def);
        self.record(call, &decision);
        decision
    }

    fn evaluate_inner(&self, call: &ToolCall, tool_def: &ToolDefinition) -> Decision {
        if let Some(rule) = self.best_match(call, RuleAction::Deny) {
            debug!(rule_id = rule.id(), "deny rule matched");
            return Decision::AutoDeny {
                rule_id: Some(rule.id().to_string()),
            };
        }

        if let Some(rule) = self.best_match(call, RuleAction::Allow) {
            debug!(rule_id = rule.id(), "allow rule matched");
            return Decision::AutoAllow {
                rule_id: Some(rule.id().to_string()),
            };
        }

        match tool_def.approval_class {
            ApprovalClass::Never => Decision::AutoAllow { rule_id: None },
            ApprovalClass::Always => Decision::RequireHuman,
            ApprovalClass::RuleGated => Decision::RequireHuman,
        }
    }

    fn best_match(&self, call: &ToolCall, action: RuleAction) -> Option<&ApprovalRule> {
        let mut candidates: Vec<&ApprovalRule> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.enabled() && r.action() == action && r.matches(call))
            .map(|(_, r)| r)
            .collect();

        // Stable sort descending by priority preserves registration order
        // (the original index ordering `rules` was built in) among ties.
        candidates.sort_by(|a, b| b.priority().cmp(&a.priority()));
        candidates.into_iter().next()
    }

    fn record(&self, call: &ToolCall, decision: &Decision) {
        let recorded = match decision {
            Decision::AutoAllow { .. } => RecordedDecision::AutoAllow,
            Decision::AutoDeny { .. } => RecordedDecision::AutoDeny,
            Decision::RequireHuman => return, // recorded on resolution instead
        };
        let rule_id = match decision {
            Decision::AutoAllow { rule_id } | Decision::AutoDeny { rule_id } => rule_id.clone(),
            Decision::RequireHuman => None,
        };
        self.push_record(call, rule_id, recorded);
    }

    /// Records a human's resolution of a previously-pending call. Called by
    /// the Dispatcher once `resolve_approval` arrives.
    pub fn record_human_decision(
        &self,
        call: &ToolCall,
        request_id: impl Into<String>,
        decision: HumanDecision,
    ) -> ApprovalRecord {
        let recorded = match decision {
            HumanDecision::Allow => RecordedDecision::HumanAllow,
            HumanDecision::Deny => RecordedDecision::HumanDeny,
        };
        self.push_record_with_id(call, request_id.into(), None, recorded)
    }

    /// Records that a pending call was cancelled before a human resolved it
    /// (spec §4.4 `Aborted` state). Called by the Dispatcher when the
    /// cancellation token fires while `await_human` is still waiting.
    pub fn record_aborted(&self, call: &ToolCall, request_id: impl Into<String>) -> ApprovalRecord {
        self.push_record_with_id(call, request_id.into(), None, RecordedDecision::Aborted)
    }

    fn push_record(&self, call: &ToolCall, rule_id: Option<String>, decision: RecordedDecision) -> ApprovalRecord {
        self.push_record_with_id(call, call.id.clone(), rule_id, decision)
    }

    fn push_record_with_id(
        &self,
        call: &ToolCall,
        request_id: String,
        rule_id: Option<String>,
        decision: RecordedDecision,
    ) -> ApprovalRecord {
        let record = ApprovalRecord {
            request_id,
            tool_name: call.name.clone(),
            matched_rule_id: rule_id,
            decision,
            timestamp: chrono::Utc::now(),
        };
        let mut log = self.audit_log.lock().expect("audit log lock poisoned");
        log.push(record.clone());
        record
    }

    /// Read-only view of the audit log (spec §6: "may be exposed through a
    /// read-only iterator").
    pub fn audit_log(&self) -> Vec<ApprovalRecord> {
        self.audit_log.lock().expect("audit log lock poisoned").clone()
    }
}

impl Default for ApprovalEngine {
    fn default() -> Self {
        warn!("ApprovalEngine constructed with no rules; every rule-gated tool defers to a human");
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handlers::demo::ReadFileHandler;
    use crate::types::{OutputContract, SideEffect};
    use std::sync::Arc;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            server: "fs".into(),
            name: name.into(),
            args,
        }
    }

    fn rule_gated_def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "test".into(),
            args_schema: serde_json::json!({}),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::Write,
            approval_class: ApprovalClass::RuleGated,
            handler: Arc::new(ReadFileHandler::default()),
        }
    }

    #[test]
    fn deny_rule_wins_over_allow_at_higher_priority() {
        let rules = vec![
            ApprovalRule::tool_pattern("allow-all-fs", 500, "write_file", RuleAction::Allow),
            ApprovalRule::path_glob(
                "deny-etc",
                1000,
                "/etc/**",
                "path",
                RuleAction::Deny,
            )
            .unwrap(),
        ];
        let engine = ApprovalEngine::new(rules);
        let c = call("write_file", serde_json::json!({"path": "/etc/passwd"}));
        let decision = engine.evaluate(&c, &rule_gated_def("write_file"));
        assert_eq!(
            decision,
            Decision::AutoDeny {
                rule_id: Some("deny-etc".into())
            }
        );
    }

    #[test]
    fn no_match_falls_back_to_require_human() {
        let engine = ApprovalEngine::new(vec![]);
        let c = call("write_file", serde_json::json!({"path": "README.md"}));
        assert_eq!(engine.evaluate(&c, &rule_gated_def("write_file")), Decision::RequireHuman);
    }

    #[test]
    fn never_class_auto_allows_with_no_rules() {
        let engine = ApprovalEngine::new(vec![]);
        let mut def = rule_gated_def("read_file");
        def.approval_class = ApprovalClass::Never;
        let c = call("read_file", serde_json::json!({"path": "src/main.rs"}));
        assert_eq!(engine.evaluate(&c, &def), Decision::AutoAllow { rule_id: None });
    }

    #[test]
    fn path_glob_allow_rule_matches() {
        let rules = vec![ApprovalRule::path_glob(
            "allow-src",
            100,
            "src/**",
            "path",
            RuleAction::Allow,
        )
        .unwrap()];
        let engine = ApprovalEngine::new(rules);
        let c = call("list_files", serde_json::json!({"path": "src/main.rs"}));
        assert_eq!(
            engine.evaluate(&c, &rule_gated_def("list_files")),
            Decision::AutoAllow {
                rule_id: Some("allow-src".into())
            }
        );
    }
}
