// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Forge core: an autonomous coding-agent runtime.
//!
//! This crate implements the Agent Loop, Tool Dispatcher, Approval Engine,
//! Context Manager, and Event Bus described in the project specification.
//! It makes no assumption about a UI, a process model, or a specific LLM
//! wire protocol beyond the [`types::Provider`] trait — those are supplied
//! by an embedder (see `src/main.rs` for a minimal one).

pub mod agent;
pub mod approval;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod memory;
pub mod providers;
pub mod tools;
pub mod types;

pub use agent::{Agent, AgentConfig, TurnOutcome};
pub use error::{ForgeError, Result};
pub use events::{Event, EventBus, EventKind, EventSubscriber, SessionId};
