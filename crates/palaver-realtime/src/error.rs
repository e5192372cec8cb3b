//! Error types for the session layer.

use palaver_core::{MessageId, RejectReason, UserId};
use thiserror::Error;

/// Session layer errors.
///
/// Every variant is recoverable: failures are surfaced to the directly
/// involved caller and never propagate to unrelated connections or calls.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The referenced call does not exist (never created, or already ended
    /// and garbage-collected).
    #[error("call no longer exists")]
    CallNotFound,

    /// An active call already exists between this pair of users.
    #[error("a call between {caller} and {callee} is already in progress")]
    CallConflict { caller: UserId, callee: UserId },

    /// The callee has no registered signaling address.
    #[error("{callee} has no registered signaling address")]
    Unreachable { callee: UserId },

    /// The operation is not valid in the call's current state.
    #[error("cannot {op} a call in the {state} state")]
    InvalidTransition {
        op: &'static str,
        state: &'static str,
    },

    /// The referenced message was never delivered through this pipeline,
    /// or the reader was not among its recipients.
    #[error("no delivery record for message {0}")]
    MessageNotFound(MessageId),

    /// The membership collaborator failed to resolve a group or
    /// conversation.
    #[error("membership lookup failed: {0}")]
    Directory(String),
}

impl RealtimeError {
    /// Create a new directory lookup error.
    pub fn directory(msg: impl Into<String>) -> Self {
        Self::Directory(msg.into())
    }

    /// Map onto the wire-level rejection taxonomy.
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            RealtimeError::CallNotFound | RealtimeError::MessageNotFound(_) => {
                RejectReason::NotFound
            }
            RealtimeError::CallConflict { .. } => RejectReason::Conflict,
            RealtimeError::Unreachable { .. } => RejectReason::Unreachable,
            RealtimeError::InvalidTransition { .. } => RejectReason::InvalidState,
            RealtimeError::Directory(_) => RejectReason::NotFound,
        }
    }
}
