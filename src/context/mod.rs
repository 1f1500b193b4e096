// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt assembly and compaction orchestration (spec §4.2).

pub mod threshold;
pub mod tool_batch;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::events::{EventBus, EventKind};
use crate::memory::MemoryStore;
use crate::types::{BoxedProvider, Message};

pub use threshold::ThresholdSummarization;
pub use tool_batch::ToolCallBatchedSummarization;

#[derive(Debug, thiserror::Error)]
pub enum CompactionError {
    #[error("could not locate the first message to replace by timestamp")]
    CompactionRaceDetected,

    #[error("summarisation LLM call failed: {0}")]
    LlmFailed(String),

    #[error(transparent)]
    Memory(#[from] crate::memory::MemoryError),

    #[error("cancelled")]
    Cancelled,
}

/// A pluggable compaction strategy (spec §4.2 "Strategy interface").
#[async_trait]
pub trait CompactionStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn should_run(&self, memory: &MemoryStore, current_tokens: usize, max_tokens: usize) -> bool;

    /// Returns the count of messages processed (spec §8: `processed ≤
    /// total` for every compaction event).
    async fn summarize(
        &self,
        memory: &MemoryStore,
        provider: &dyn crate::types::Provider,
        events: &mut EventBus,
        cancel: &CancellationToken,
    ) -> Result<u32, CompactionError>;
}

/// Prepares the LLM prompt slice and runs compaction at turn boundaries.
pub struct ContextManager {
    memory: Arc<MemoryStore>,
    provider: Arc<BoxedProvider>,
    strategies: Vec<Box<dyn CompactionStrategy>>,
    max_tokens: usize,
}

impl ContextManager {
    pub fn new(memory: Arc<MemoryStore>, provider: Arc<BoxedProvider>, max_tokens: usize) -> Self {
        Self {
            memory,
            provider,
            strategies: vec![
                Box::new(ThresholdSummarization::default()),
                Box::new(ToolCallBatchedSummarization::default()),
            ],
            max_tokens,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<Box<dyn CompactionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Returns the prompt slice: system message, any summary messages, then
    /// the preserved suffix — which for an uncompacted log is simply the
    /// whole log (spec §4.2 `build_prompt`).
    pub fn build_prompt(&self) -> (Vec<Message>, usize) {
        let messages = self.memory.snapshot();
        let tokens = self.provider.estimate_tokens(&messages);
        (messages, tokens)
    }

    /// Runs every strategy whose `should_run` trips, in declared order,
    /// until none trigger or an LLM error suppresses compaction for the
    /// remainder of the turn (spec §7: `CompactionError` is non-fatal).
    #[instrument(skip(self, events, cancel))]
    pub async fn on_turn_boundary(&self, events: &mut EventBus, cancel: &CancellationToken) {
        loop {
            let current_tokens = self.provider.estimate_tokens(&self.memory.snapshot());
            let Some(strategy) = self
                .strategies
                .iter()
                .find(|s| s.should_run(&self.memory, current_tokens, self.max_tokens))
            else {
                return;
            };

            if cancel.is_cancelled() {
                return;
            }

            events.emit(EventKind::ContextCompactionStarted {
                strategy: strategy.name().to_string(),
            });

            match strategy
                .summarize(&self.memory, self.provider.as_ref().as_ref(), events, cancel)
                .await
            {
                Ok(processed) => {
                    events.emit(EventKind::ContextCompactionCompleted {
                        strategy: strategy.name().to_string(),
                        processed,
                    });
                    info!(strategy = strategy.name(), processed, "compaction completed");
                }
                Err(err) => {
                    tracing::warn!(strategy = strategy.name(), error = %err, "compaction suppressed for this turn");
                    return;
                }
            }
        }
    }
}

pub(crate) const SUMMARY_SYSTEM_PROMPT: &str =
    "You summarise agent conversations concisely while preserving key facts, decisions, and constraints";

pub(crate) const GROUP_SUMMARY_PROMPT: &str =
    "Produce a 2-3 sentence summary capturing tool, intent, key parameters, and outcome";
