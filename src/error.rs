// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Crate-wide error types.
//!
//! Each subsystem keeps a focused error enum; [`ForgeError`] unifies them so
//! callers at the agent-loop boundary can match on the handful of kinds
//! spec'd for turn termination without needing to know which subsystem raised
//! them.

use std::fmt;

use crate::approval::ApprovalError;
use crate::memory::MemoryError;

pub type Result<T, E = ForgeError> = std::result::Result<T, E>;

/// Stable error kind for tool execution failures, used both for user-facing
/// reporting and as an input to the identical-error budget hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Schema,
    Execution,
    Timeout,
    Denied,
    Protocol,
    Provider,
    Compaction,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Schema => "schema_error",
            Self::Execution => "execution_error",
            Self::Timeout => "timed_out",
            Self::Denied => "denied",
            Self::Protocol => "protocol_error",
            Self::Provider => "provider_error",
            Self::Compaction => "compaction_error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Top-level error for the agent runtime.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("tool arguments failed schema validation: {0}")]
    SchemaError(String),

    #[error("tool execution failed ({kind}): {detail}")]
    ExecutionError { kind: String, detail: String },

    #[error("tool call timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("tool call denied: {0}")]
    Denied(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("provider error: {0}")]
    ProviderError(String),

    #[error("compaction error: {0}")]
    CompactionError(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("memory invariant violated: {0}")]
    Memory(#[from] MemoryError),

    #[error("approval engine error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("tool registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ForgeError {
    /// The stable kind used for identical-error budgeting and user-facing
    /// reporting; see spec §7 and §9.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SchemaError(_) => ErrorKind::Schema,
            Self::ExecutionError { .. } => ErrorKind::Execution,
            Self::TimedOut(_) => ErrorKind::Timeout,
            Self::Denied(_) => ErrorKind::Denied,
            Self::ProtocolError(_) => ErrorKind::Protocol,
            Self::ProviderError(_) => ErrorKind::Provider,
            Self::CompactionError(_) => ErrorKind::Compaction,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Memory(_) | Self::Registry(_) | Self::Io(_) | Self::Json(_) | Self::ConfigError(_) => {
                ErrorKind::Execution
            }
            Self::Approval(_) => ErrorKind::Denied,
        }
    }

    /// Whether this error is recoverable within the turn (reported to the
    /// agent as a Tool message and the loop continues) or turn-fatal.
    pub fn is_turn_fatal(&self) -> bool {
        matches!(
            self,
            Self::ProtocolError(_) | Self::ProviderError(_) | Self::Cancelled
        )
    }
}
