// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-module behavioural scenarios exercised against the public API.

mod support;

use std::sync::Arc;

use forge_core::agent::{Agent, AgentConfig, TurnOutcome};
use forge_core::approval::{ApprovalEngine, ApprovalRule, HumanDecision, RuleAction};
use forge_core::events::{EventBus, EventKind, SessionId, TurnFailureReason};
use forge_core::tools::handlers::{control, demo};
use forge_core::tools::ToolRegistry;
use forge_core::types::{ApprovalClass, OutputContract, SideEffect, ToolDefinition};
use tokio_util::sync::CancellationToken;

use support::{FakeProvider, ScriptedReply};

fn control_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "task_completion".into(),
            description: "done".into(),
            args_schema: serde_json::json!({"type": "object"}),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::PurelyInternal,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(control::TaskCompletionHandler),
        },
        ToolDefinition {
            name: "converse".into(),
            description: "reply".into(),
            args_schema: serde_json::json!({"type": "object"}),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::PurelyInternal,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(control::ConverseHandler),
        },
    ]
}

fn list_files_def() -> ToolDefinition {
    ToolDefinition {
        name: "list_files".into(),
        description: "lists files".into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path"],
        }),
        output_contract: OutputContract::Structured,
        side_effect: SideEffect::Read,
        approval_class: ApprovalClass::RuleGated,
        handler: Arc::new(ListingHandler),
    }
}

/// Returns a fixed directory listing without touching the filesystem.
struct ListingHandler;

#[async_trait::async_trait]
impl forge_core::tools::ToolHandler for ListingHandler {
    async fn execute(
        &self,
        _args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<String, String> {
        Ok(serde_json::json!(["main.go", "util.go"]).to_string())
    }
}

fn execute_command_def() -> ToolDefinition {
    ToolDefinition {
        name: "execute_command".into(),
        description: "runs a shell command".into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"],
        }),
        output_contract: OutputContract::CommandOutput,
        side_effect: SideEffect::Execute,
        approval_class: ApprovalClass::RuleGated,
        handler: Arc::new(FailingHandler),
    }
}

fn write_file_def() -> ToolDefinition {
    ToolDefinition {
        name: "write_file".into(),
        description: "writes a file".into(),
        args_schema: serde_json::json!({
            "type": "object",
            "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
            "required": ["path", "content"],
        }),
        output_contract: OutputContract::Diff,
        side_effect: SideEffect::Write,
        approval_class: ApprovalClass::RuleGated,
        handler: Arc::new(demo::WriteFileHandler::default()),
    }
}

/// Always fails with the same canonical error text, used to drive
/// Scenario D's identical-error budget.
struct FailingHandler;

#[async_trait::async_trait]
impl forge_core::tools::ToolHandler for FailingHandler {
    async fn execute(
        &self,
        _args: serde_json::Value,
        _cancel: CancellationToken,
    ) -> Result<String, String> {
        Err("npm not found".to_string())
    }
}

#[tokio::test]
async fn scenario_a_simple_completion_ends_after_two_iterations() {
    let provider = FakeProvider::new(vec![
        ScriptedReply::tool_call("fs", "list_files", serde_json::json!({"path": "src"})),
        ScriptedReply::tool_call("control", "task_completion", serde_json::json!({"summary": "done"})),
    ]);

    let registry = ToolRegistry::builder()
        .register(list_files_def())
        .unwrap()
        .register(control_tools().remove(0))
        .unwrap()
        .build()
        .unwrap();

    let rules = vec![ApprovalRule::path_glob("allow-src", 10, "src", "path", RuleAction::Allow).unwrap()];
    let approval = Arc::new(ApprovalEngine::new(rules));

    let mut agent = Agent::new(Box::new(provider), Arc::new(registry), approval, AgentConfig::default(), "system");
    let mut bus = EventBus::new(SessionId::new(), 256);
    let mut sub = bus.subscribe();

    let outcome = agent.run_turn("list files in src", &mut bus, CancellationToken::new()).await;
    assert!(matches!(outcome, TurnOutcome::Completed { .. }));

    let mut iterations_started = 0;
    let mut approvals_requested = 0;
    while let Some(event) = sub.try_recv() {
        match event.kind {
            EventKind::IterationStarted { .. } => iterations_started += 1,
            EventKind::ApprovalRequested { .. } => approvals_requested += 1,
            _ => {}
        }
    }
    assert_eq!(iterations_started, 2);
    assert_eq!(approvals_requested, 0);
}

#[tokio::test]
async fn scenario_b_denial_is_followed_by_a_converse_reply() {
    let provider = FakeProvider::new(vec![
        ScriptedReply::tool_call("shell", "execute_command", serde_json::json!({"command": "rm /etc/passwd"})),
        ScriptedReply::tool_call("control", "converse", serde_json::json!({"message": "I can't do that."})),
    ]);

    let mut tools = control_tools();
    let registry = ToolRegistry::builder()
        .register(execute_command_def())
        .unwrap()
        .register(tools.remove(1)) // converse
        .unwrap()
        .build()
        .unwrap();

    let rules = vec![ApprovalRule::command_pattern(
        "blacklist-rm",
        1000,
        r"rm\s+/etc/",
        "command",
        RuleAction::Deny,
    )
    .unwrap()];
    let approval = Arc::new(ApprovalEngine::new(rules));

    let mut agent = Agent::new(Box::new(provider), Arc::new(registry), approval, AgentConfig::default(), "system");
    let mut bus = EventBus::new(SessionId::new(), 256);

    let outcome = agent.run_turn("delete /etc/passwd", &mut bus, CancellationToken::new()).await;
    assert!(matches!(outcome, TurnOutcome::Completed { .. }));

    let snapshot = agent.memory().snapshot();
    let denied = snapshot
        .iter()
        .find(|m| m.tool_reply_to().is_some())
        .expect("expected a tool reply message");
    assert_eq!(denied.role, forge_core::types::Role::Tool);
}

#[tokio::test]
async fn scenario_c_human_approval_unblocks_a_suspended_call() {
    let provider = FakeProvider::new(vec![
        ScriptedReply::tool_call("fs", "write_file", serde_json::json!({"path": "README.md", "content": "hi"})),
        ScriptedReply::tool_call("control", "task_completion", serde_json::json!({"summary": "done"})),
    ]);

    let mut tools = control_tools();
    let registry = ToolRegistry::builder()
        .register(write_file_def())
        .unwrap()
        .register(tools.remove(0)) // task_completion
        .unwrap()
        .build()
        .unwrap();

    // No matching rule for write_file: falls through to RequireHuman.
    let approval = Arc::new(ApprovalEngine::new(vec![]));

    let mut agent = Agent::new(Box::new(provider), Arc::new(registry), approval, AgentConfig::default(), "system");
    let dispatcher = agent.dispatcher_handle();

    let mut bus = EventBus::new(SessionId::new(), 256);
    let mut sub = bus.subscribe();

    let resolver = tokio::spawn(async move {
        loop {
            let event = sub.recv().await.expect("event stream ended before approval request");
            if let EventKind::ApprovalRequested { request_id, .. } = event.kind {
                dispatcher.resolve_approval(&request_id, HumanDecision::Allow).await;
                break;
            }
        }
    });

    let outcome = agent.run_turn("write README.md", &mut bus, CancellationToken::new()).await;
    resolver.await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Completed { .. }));
}

#[tokio::test]
async fn scenario_d_identical_error_budget_fails_the_turn() {
    let replies: Vec<ScriptedReply> = (0..6)
        .map(|_| ScriptedReply::tool_call("shell", "execute_command", serde_json::json!({"command": "npm test"})))
        .collect();
    let provider = FakeProvider::new(replies);

    let registry = ToolRegistry::builder().register(execute_command_def()).unwrap().build().unwrap();

    let rules = vec![ApprovalRule::tool_pattern(
        "allow-exec",
        10,
        "execute_command",
        RuleAction::Allow,
    )];
    let approval = Arc::new(ApprovalEngine::new(rules));

    let config = AgentConfig {
        max_iterations: 10,
        max_identical_errors: 5,
        ..Default::default()
    };
    let mut agent = Agent::new(Box::new(provider), Arc::new(registry), approval, config, "system");
    let mut bus = EventBus::new(SessionId::new(), 256);
    let mut sub = bus.subscribe();

    let outcome = agent.run_turn("run the tests", &mut bus, CancellationToken::new()).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            reason: TurnFailureReason::ErrorBudget,
            ..
        }
    ));

    let mut iterations_started = 0;
    while let Some(event) = sub.try_recv() {
        if let EventKind::IterationStarted { .. } = event.kind {
            iterations_started += 1;
        }
    }
    assert_eq!(iterations_started, 5, "no 6th iteration should start once the budget trips");
}

#[tokio::test]
async fn scenario_f_cancellation_before_tool_call_leaves_no_assistant_message() {
    let provider = FakeProvider::new(vec![ScriptedReply::text("<thinking>let me look</thinking>")]);
    let registry = ToolRegistry::builder().build().unwrap();
    let approval = Arc::new(ApprovalEngine::new(vec![]));

    let mut agent = Agent::new(Box::new(provider), Arc::new(registry), approval, AgentConfig::default(), "system");
    let mut bus = EventBus::new(SessionId::new(), 256);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = agent.run_turn("do something", &mut bus, cancel).await;
    assert!(matches!(outcome, TurnOutcome::Cancelled));

    let snapshot = agent.memory().snapshot();
    assert!(
        snapshot.iter().all(|m| m.role != forge_core::types::Role::Assistant),
        "no assistant message should be appended for a cancelled iteration"
    );
    assert!(snapshot.iter().any(|m| m.role == forge_core::types::Role::User));
}
