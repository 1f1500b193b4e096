// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! S2: Tool-Call Batched Summarisation (spec §4.2).

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{CompactionError, CompactionStrategy, GROUP_SUMMARY_PROMPT};
use crate::events::{EventBus, EventKind};
use crate::memory::MemoryStore;
use crate::types::{Message, Provider, Role};

/// Parameters named in spec §4.2: `age_threshold` (A), `min_batch` (M),
/// `max_age` (X).
pub struct ToolCallBatchedSummarization {
    pub age_threshold: usize,
    pub min_batch: usize,
    pub max_age: usize,
}

impl Default for ToolCallBatchedSummarization {
    fn default() -> Self {
        Self {
            age_threshold: 20,
            min_batch: 10,
            max_age: 40,
        }
    }
}

/// One run of consecutive tool-related old messages, tracked by their
/// absolute index in the full message log so the rebuild can locate them.
struct Group {
    indices: Vec<usize>,
}

fn old_prefix_len(total: usize, age_threshold: usize) -> usize {
    total.saturating_sub(age_threshold)
}

fn scan_groups(messages: &[Message], old_len: usize) -> Vec<Group> {
    let mut groups = Vec::new();
    let mut current: Vec<usize> = Vec::new();

    for (i, msg) in messages.iter().enumerate().take(old_len) {
        if msg.role == Role::System || msg.is_summarized() {
            continue;
        }
        if msg.looks_tool_related() {
            current.push(i);
            if msg.role == Role::Tool {
                groups.push(Group {
                    indices: std::mem::take(&mut current),
                });
            }
        } else if !current.is_empty() {
            groups.push(Group {
                indices: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        groups.push(Group { indices: current });
    }
    groups
}

#[async_trait]
impl CompactionStrategy for ToolCallBatchedSummarization {
    fn name(&self) -> &str {
        "ToolCallBatchedSummarization"
    }

    fn should_run(&self, memory: &MemoryStore, _current_tokens: usize, _max_tokens: usize) -> bool {
        let snapshot = memory.snapshot();
        let total = snapshot.len();
        let old_len = old_prefix_len(total, self.age_threshold);
        if old_len == 0 {
            return false;
        }

        let mut buffer_count = 0usize;
        let mut oldest_index: Option<usize> = None;
        for (i, msg) in snapshot.iter().enumerate().take(old_len) {
            if msg.is_summarized() {
                continue;
            }
            let is_tool_related = msg.role == Role::Tool || msg.looks_tool_related();
            if is_tool_related {
                buffer_count += 1;
                oldest_index.get_or_insert(i);
            }
        }

        let Some(oldest) = oldest_index else {
            return false;
        };

        buffer_count >= self.min_batch || (total - oldest) >= self.max_age
    }

    async fn summarize(
        &self,
        memory: &MemoryStore,
        provider: &dyn Provider,
        events: &mut EventBus,
        cancel: &CancellationToken,
    ) -> Result<u32, CompactionError> {
        let snapshot = memory.snapshot();
        let total = snapshot.len();
        let old_len = old_prefix_len(total, self.age_threshold);
        if old_len == 0 {
            return Ok(0);
        }

        let groups = scan_groups(&snapshot, old_len);
        if groups.is_empty() {
            return Ok(0);
        }

        if cancel.is_cancelled() {
            return Err(CompactionError::Cancelled);
        }

        let total_groups = groups.len() as u32;
        let mut futs = FuturesUnordered::new();
        for (group_idx, group) in groups.iter().enumerate() {
            let batch: Vec<Message> = group.indices.iter().map(|&i| snapshot[i].clone()).collect();
            futs.push(async move {
                let result = provider.complete(&batch, None, Some(GROUP_SUMMARY_PROMPT)).await;
                (group_idx, batch.len(), result)
            });
        }

        let mut summaries: Vec<Option<Message>> = (0..groups.len()).map(|_| None).collect();
        let mut completed = 0u32;

        while let Some((group_idx, group_len, result)) = futs.next().await {
            if cancel.is_cancelled() {
                // Partial summaries are discarded; memory is untouched.
                return Err(CompactionError::Cancelled);
            }
            let response = result.map_err(|e| CompactionError::LlmFailed(e.to_string()))?;

            completed += 1;
            events.emit(EventKind::ContextCompactionProgress {
                strategy: self.name().to_string(),
                processed: completed,
                total: total_groups,
            });

            let mut summary = Message::assistant(response.content, None);
            summary.metadata.insert("summarized".into(), serde_json::json!(true));
            summary
                .metadata
                .insert("original_message_count".into(), serde_json::json!(group_len));
            summaries[group_idx] = Some(summary);
        }

        // All groups succeeded: rebuild is now safe to perform.
        let mut index_to_group: HashMap<usize, usize> = HashMap::new();
        for (g, group) in groups.iter().enumerate() {
            for &i in &group.indices {
                index_to_group.insert(i, g);
            }
        }

        let mut rebuilt: Vec<Message> = Vec::with_capacity(total);
        let mut i = 0;
        while i < old_len {
            if let Some(&g) = index_to_group.get(&i) {
                rebuilt.push(summaries[g].take().expect("every group produced a summary"));
                i = *groups[g].indices.last().unwrap() + 1;
            } else {
                rebuilt.push(snapshot[i].clone());
                i += 1;
            }
        }
        rebuilt.extend(snapshot[old_len..].iter().cloned());

        // `rebuilt` already holds preserved System messages in their original
        // positions, followed by group summaries, followed by the untouched
        // suffix. Install it directly: `clear_non_system` would instead keep
        // every System message from the pre-rebuild snapshot (including ones
        // from the untouched suffix) and hoist them all to the front ahead of
        // the summaries, reordering the conversation.
        memory.replace_all(rebuilt);

        let processed: usize = groups.iter().map(|g| g.indices.len()).sum();
        Ok(processed as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Message, ToolCall, ToolStatus};

    fn tool_pair(id: &str) -> [Message; 2] {
        [
            Message::assistant(
                format!("<tool><server>fs</server><n>read_file</n><args>{{}}</args></tool>"),
                Some(ToolCall {
                    id: id.into(),
                    server: "fs".into(),
                    name: "read_file".into(),
                    args: serde_json::json!({}),
                }),
            ),
            Message::tool_reply(id, "ok", ToolStatus::Ok, None),
        ]
    }

    #[test]
    fn should_run_false_on_empty_old_prefix() {
        let s = ToolCallBatchedSummarization::default();
        let memory = MemoryStore::new();
        memory.append(Message::system("sys"));
        for i in 0..5 {
            memory.append_many(tool_pair(&i.to_string()));
        }
        // total=11, age_threshold=20 -> old_len=0
        assert!(!s.should_run(&memory, 0, 0));
    }

    #[test]
    fn should_run_true_once_buffer_reaches_min_batch() {
        let s = ToolCallBatchedSummarization {
            age_threshold: 0,
            min_batch: 4,
            max_age: 100,
        };
        let memory = MemoryStore::new();
        memory.append(Message::system("sys"));
        for i in 0..2 {
            memory.append_many(tool_pair(&i.to_string()));
        }
        // 4 tool-related messages in the (full, since age_threshold=0) old prefix
        assert!(s.should_run(&memory, 0, 0));
    }

    #[test]
    fn scan_groups_pairs_assistant_call_with_tool_reply() {
        let memory = MemoryStore::new();
        memory.append(Message::system("sys"));
        memory.append_many(tool_pair("a"));
        memory.append_many(tool_pair("b"));
        let snapshot = memory.snapshot();
        let groups = scan_groups(&snapshot, snapshot.len());
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].indices.len(), 2);
        assert_eq!(groups[1].indices.len(), 2);
    }
}
