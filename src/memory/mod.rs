// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ordered, append-dominant conversation store (spec §3 "Conversation
//! Memory", §4.1).
//!
//! All mutation runs under one `std::sync::Mutex`-backed serial section, so
//! concurrent callers are totally ordered and a reader's [`MemoryStore::snapshot`]
//! never observes a torn write. The lock is held only for the duration of a
//! copy or a vector splice, never across an `.await`.

use std::sync::Mutex;

use tracing::{debug, instrument};

use crate::types::{Message, Role};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("replace_range start {start} + count {count} exceeds length {len}")]
    InvalidRange {
        start: usize,
        count: usize,
        len: usize,
    },

    #[error("replace_range would orphan a tool message from its caller")]
    OrphanedTool,
}

struct Inner {
    messages: Vec<Message>,
}

/// Ordered message log plus a pinned, never-removable system message at
/// index 0 (once one exists).
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: Vec::new(),
            }),
        }
    }

    /// Appends one message, returning its index.
    #[instrument(skip(self, msg), fields(role = ?msg.role))]
    pub fn append(&self, msg: Message) -> usize {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.messages.push(msg);
        debug!(len = inner.messages.len(), "appended message");
        inner.messages.len() - 1
    }

    /// Appends a batch, returning the index of the first appended message.
    pub fn append_many(&self, msgs: impl IntoIterator<Item = Message>) -> usize {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let first = inner.messages.len();
        inner.messages.extend(msgs);
        first
    }

    /// A cheap clone of the current view; writers are never blocked longer
    /// than this copy.
    pub fn snapshot(&self) -> Vec<Message> {
        let inner = self.inner.lock().expect("memory store lock poisoned");
        inner.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("memory store lock poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically substitutes `messages[start..start+count]` with one
    /// summary message (spec I3: rejects removals that would orphan a tool
    /// message from its Assistant caller, or vice versa).
    #[instrument(skip(self, summary), fields(start, count))]
    pub fn replace_range(
        &self,
        start: usize,
        count: usize,
        summary: Message,
    ) -> Result<(), MemoryError> {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        let len = inner.messages.len();
        if count == 0 || start.checked_add(count).map(|end| end > len).unwrap_or(true) {
            return Err(MemoryError::InvalidRange { start, count, len });
        }

        let removed_end = start + count;
        if would_orphan_tool(&inner.messages, start, removed_end) {
            return Err(MemoryError::OrphanedTool);
        }

        inner.messages.splice(start..removed_end, [summary]);
        debug!(new_len = inner.messages.len(), "replaced range");
        Ok(())
    }

    /// Drops every message except a leading System message, if present.
    pub fn clear_non_system(&self) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.messages.retain(|m| m.role == Role::System);
    }

    /// Atomically swaps in a full replacement log. Used by compaction
    /// strategies that rebuild the whole conversation (S2): the caller's
    /// rebuilt vector already reflects the desired ordering, so this must
    /// install it verbatim rather than re-deriving it from `retain`-style
    /// filters that would reshuffle interleaved System messages.
    pub fn replace_all(&self, messages: Vec<Message>) {
        let mut inner = self.inner.lock().expect("memory store lock poisoned");
        inner.messages = messages;
        debug!(new_len = inner.messages.len(), "replaced entire log");
    }
}

/// True if removing `[start, end)` would separate an Assistant message that
/// carries a tool call from the Tool message answering it, or leave a Tool
/// message in the log with no remaining caller.
fn would_orphan_tool(messages: &[Message], start: usize, end: usize) -> bool {
    let removed = &messages[start..end];

    for msg in removed {
        if let Some(call) = msg.tool_call() {
            let answered_within = removed.iter().any(|m| m.tool_reply_to() == Some(call.id.as_str()));
            let answered_outside = messages[end..]
                .iter()
                .any(|m| m.tool_reply_to() == Some(call.id.as_str()));
            if answered_outside && !answered_within {
                return true;
            }
        }
    }

    for msg in removed {
        if let Some(call_id) = msg.tool_reply_to() {
            let caller_in_removed = removed.iter().any(|m| m.tool_call().map(|c| c.id.as_str()) == Some(call_id));
            let caller_before = messages[..start]
                .iter()
                .any(|m| m.tool_call().map(|c| c.id.as_str()) == Some(call_id));
            if caller_before && !caller_in_removed {
                return true;
            }
        }
    }

    false
}
