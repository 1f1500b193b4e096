// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! S1: Threshold Summarisation (spec §4.2).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CompactionError, CompactionStrategy, SUMMARY_SYSTEM_PROMPT};
use crate::events::EventBus;
use crate::memory::MemoryStore;
use crate::types::{Message, Provider, Role};

/// Triggers when accumulated tokens reach `trigger_pct` of `max_tokens`,
/// then replaces the oldest `batch_size` unsummarised User/Assistant
/// messages with one LLM-produced summary.
pub struct ThresholdSummarization {
    pub trigger_pct: u8,
    pub batch_size: usize,
}

impl Default for ThresholdSummarization {
    fn default() -> Self {
        Self {
            trigger_pct: 80,
            batch_size: 10,
        }
    }
}

#[async_trait]
impl CompactionStrategy for ThresholdSummarization {
    fn name(&self) -> &str {
        "ThresholdSummarization"
    }

    fn should_run(&self, _memory: &MemoryStore, current_tokens: usize, max_tokens: usize) -> bool {
        max_tokens > 0 && (current_tokens as f64 / max_tokens as f64) >= (self.trigger_pct as f64 / 100.0)
    }

    async fn summarize(
        &self,
        memory: &MemoryStore,
        provider: &dyn Provider,
        _events: &mut EventBus,
        cancel: &CancellationToken,
    ) -> Result<u32, CompactionError> {
        let snapshot = memory.snapshot();

        let candidates: Vec<&Message> = snapshot
            .iter()
            .skip(1) // never touch a leading system message
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.is_summarized())
            .take(self.batch_size)
            .collect();

        if candidates.is_empty() {
            return Ok(0);
        }

        let first_timestamp = candidates[0].timestamp;
        let last_timestamp = candidates[candidates.len() - 1].timestamp;
        let start = snapshot
            .iter()
            .position(|m| m.timestamp == first_timestamp)
            .ok_or(CompactionError::CompactionRaceDetected)?;
        let mut end = snapshot
            .iter()
            .position(|m| m.timestamp == last_timestamp)
            .ok_or(CompactionError::CompactionRaceDetected)?;

        // The candidates are User/Assistant messages only, but a Tool reply
        // always sits right after the Assistant call it answers. Pull any
        // trailing reply into the span so the splice stays contiguous and
        // never severs a call from its reply (which trips `would_orphan_tool`
        // and silently suppresses the whole compaction).
        while end + 1 < snapshot.len() && snapshot[end + 1].role == Role::Tool {
            end += 1;
        }

        if cancel.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }

        let span = &snapshot[start..=end];
        let count = span.len();
        let batch: Vec<Message> = span.to_vec();
        let response = provider
            .complete(&batch, None, Some(SUMMARY_SYSTEM_PROMPT))
            .await
            .map_err(|e| CompactionError::LlmFailed(e.to_string()))?;

        let mut summary = Message::assistant(response.content, None);
        summary.metadata.insert("summarized".into(), serde_json::json!(true));
        summary
            .metadata
            .insert("summary_count".into(), serde_json::json!(count));
        summary.metadata.insert(
            "summary_method".into(),
            serde_json::json!("ThresholdSummarization"),
        );

        memory.replace_range(start, count, summary)?;
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_at_80_percent_by_default() {
        let s = ThresholdSummarization::default();
        let memory = MemoryStore::new();
        assert!(!s.should_run(&memory, 79, 100));
        assert!(s.should_run(&memory, 80, 100));
    }

    #[test]
    fn never_triggers_with_zero_max_tokens() {
        let s = ThresholdSummarization::default();
        let memory = MemoryStore::new();
        assert!(!s.should_run(&memory, 100, 0));
    }
}
