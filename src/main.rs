// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Forge demo binary.
//!
//! Wires a provider, a small tool registry, and an approval engine into an
//! [`Agent`] and runs a single turn non-interactively. This is a smoke-test
//! harness, not a CLI surface — the wire protocol and process model stay
//! out of scope for the core crate.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use forge_core::agent::{Agent, AgentConfig, TurnOutcome};
use forge_core::approval::{ApprovalEngine, ApprovalRule, RuleAction};
use forge_core::config::{self, CliOptions};
use forge_core::events::{EventBus, EventKind, SessionId};
use forge_core::providers;
use forge_core::tools::handlers::{control, demo};
use forge_core::tools::ToolRegistry;
use forge_core::types::{ApprovalClass, OutputContract, ProviderConfig, SideEffect, ToolDefinition};

/// Forge version string.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Forge - an autonomous coding-agent runtime.
#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about = "Autonomous coding-agent runtime", long_about = None)]
struct Cli {
    /// AI provider to use
    #[arg(short, long, env = "FORGE_PROVIDER")]
    provider: Option<String>,

    /// Model to use
    #[arg(short, long, env = "FORGE_MODEL")]
    model: Option<String>,

    /// Base URL for the API
    #[arg(long, env = "FORGE_BASE_URL")]
    base_url: Option<String>,

    /// Maximum iterations per turn
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Run a single prompt and exit
    #[arg(short = 'P', long)]
    prompt: Option<String>,

    /// Suppress startup banner
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands for forge.
#[derive(Subcommand)]
enum Commands {
    /// Show configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Initialize a new configuration file
    Init,

    /// Show version information
    Version,
}

/// Config subcommand actions.
#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Initialize a new config file
    Init,
    /// Show example configuration
    Example,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if let Some(command) = cli.command {
        return handle_command(command).await;
    }

    let cli_options = CliOptions {
        provider: cli.provider,
        model: cli.model,
        base_url: cli.base_url,
        max_iterations: cli.max_iterations,
    };

    let workspace_root = std::env::current_dir()?;
    let resolved = config::load_config(&workspace_root, cli_options)?;

    if !cli.quiet {
        print_startup_message(&resolved);
    }

    let Some(prompt) = cli.prompt else {
        println!("{}", "Nothing to do: pass --prompt/-P to run one turn.".yellow());
        println!();
        println!("Example:");
        println!("  forge -P \"list the files in this workspace\"");
        return Ok(());
    };

    run_one_turn(&resolved, &prompt).await
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}

fn print_startup_message(config: &config::ResolvedConfig) {
    println!(
        "{} {} - autonomous coding-agent runtime",
        "forge".cyan().bold(),
        format!("v{}", VERSION).dimmed()
    );
    println!(
        "Provider: {} | Model: {}",
        config.provider.green(),
        config.model.as_deref().unwrap_or("default").yellow()
    );
    println!();
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => {
            let workspace_root = std::env::current_dir()?;
            match action {
                Some(ConfigAction::Show) | None => {
                    let resolved = config::load_config(&workspace_root, CliOptions::default())?;
                    println!("{}", serde_json::to_string_pretty(&resolved)?);
                }
                Some(ConfigAction::Init) => {
                    let path = config::init_config(&workspace_root, None)?;
                    println!("Created config file: {}", path.display());
                }
                Some(ConfigAction::Example) => {
                    let example = config::get_example_config();
                    println!("{}", toml::to_string_pretty(&example)?);
                }
            }
        }
        Commands::Init => {
            let workspace_root = std::env::current_dir()?;
            let path = config::init_config(&workspace_root, None)?;
            println!("Created config file: {}", path.display());
        }
        Commands::Version => {
            println!("forge {}", VERSION);
        }
    }
    Ok(())
}

/// Builds the demo tool registry: the three loop-terminating tools plus the
/// sandboxed `read_file`/`write_file` pair, scoped to `workspace_root`.
fn build_registry(workspace_root: &std::path::Path) -> anyhow::Result<ToolRegistry> {
    let registry = ToolRegistry::builder()
        .register(ToolDefinition {
            name: "task_completion".into(),
            description: "Signal that the task is complete.".into(),
            args_schema: serde_json::json!({
                "type": "object",
                "properties": {"summary": {"type": "string"}},
                "required": ["summary"],
            }),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::PurelyInternal,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(control::TaskCompletionHandler),
        })?
        .register(ToolDefinition {
            name: "ask_question".into(),
            description: "Ask the human a clarifying question.".into(),
            args_schema: serde_json::json!({
                "type": "object",
                "properties": {"question": {"type": "string"}},
                "required": ["question"],
            }),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::PurelyInternal,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(control::AskQuestionHandler),
        })?
        .register(ToolDefinition {
            name: "converse".into(),
            description: "Send a conversational reply without ending the task.".into(),
            args_schema: serde_json::json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"],
            }),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::PurelyInternal,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(control::ConverseHandler),
        })?
        .register(ToolDefinition {
            name: "read_file".into(),
            description: "Read a text file relative to the workspace root.".into(),
            args_schema: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
            output_contract: OutputContract::FileContent,
            side_effect: SideEffect::Read,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(demo::ReadFileHandler::new(workspace_root)),
        })?
        .register(ToolDefinition {
            name: "write_file".into(),
            description: "Write a text file relative to the workspace root.".into(),
            args_schema: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"],
            }),
            output_contract: OutputContract::Diff,
            side_effect: SideEffect::Write,
            approval_class: ApprovalClass::RuleGated,
            handler: Arc::new(demo::WriteFileHandler::new(workspace_root)),
        })?
        .build()?;

    Ok(registry)
}

async fn run_one_turn(config: &config::ResolvedConfig, prompt: &str) -> anyhow::Result<()> {
    let provider_type: providers::ProviderType = config
        .provider
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown provider {:?}", config.provider))?;

    let provider_config = ProviderConfig {
        api_key: std::env::var(&config.api_key_env).ok(),
        model: config.model.clone(),
        base_url: config.base_url.clone(),
        max_output_tokens: None,
    };
    let provider = providers::create_provider(provider_type, provider_config)?;

    let registry = Arc::new(build_registry(&config.workspace_root)?);
    // write_file is the only rule-gated tool this binary registers. With no
    // rule it would fall through to RequireHuman, which blocks the turn
    // forever here: this binary runs one turn headlessly and never resolves
    // a suspended approval. Deny it outright instead.
    let rules = vec![ApprovalRule::tool_pattern(
        "deny-write-file-headless",
        0,
        "write_file",
        RuleAction::Deny,
    )];
    let approval = Arc::new(ApprovalEngine::new(rules));

    let agent_config = AgentConfig {
        max_iterations: config.max_iterations,
        max_identical_errors: config.max_consecutive_errors,
        turn_deadline: None,
        max_context_tokens: config.max_context_tokens,
    };

    let mut agent = Agent::new(
        provider,
        registry,
        approval,
        agent_config,
        "You are Forge, an autonomous coding agent. Use the available tools to complete the user's request.",
    );

    let mut events = EventBus::new(SessionId::new(), 256);
    let mut subscriber = events.subscribe();
    let cancel = CancellationToken::new();

    let print_task = tokio::spawn(async move {
        while let Some(event) = subscriber.recv().await {
            print_event(&event.kind);
        }
    });

    let outcome = agent.run_turn(prompt, &mut events, cancel).await;
    drop(events);
    let _ = print_task.await;

    match outcome {
        TurnOutcome::Completed { final_message } => {
            println!("{}", final_message);
        }
        TurnOutcome::Cancelled => {
            println!("{}", "Turn cancelled.".yellow());
        }
        TurnOutcome::Failed { reason, detail } => {
            println!("{} {:?}: {}", "Turn failed".red().bold(), reason, detail);
        }
    }

    Ok(())
}

fn print_event(kind: &EventKind) {
    match kind {
        EventKind::LLMTokenDelta { text } => print!("{text}"),
        EventKind::ToolCallDetected { call } => println!("\n{} {}", "→ tool:".dimmed(), call.name),
        EventKind::ApprovalRequested { call, .. } => {
            println!("{} {}", "⚠ approval requested:".yellow(), call.name)
        }
        EventKind::ToolCompleted { call_id, status } => {
            println!("{} {call_id} ({status:?})", "✓ tool completed:".dimmed())
        }
        _ => {}
    }
}
