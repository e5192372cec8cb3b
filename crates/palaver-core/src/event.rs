//! The wire protocol: events pushed by the server and commands sent by
//! clients, each a tagged union with fixed fields per operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CallId, CallMode, ConversationId, EndReason, MessageId, PersistedMessage, PresenceRecord,
    UserId,
};

/// Event feeds a connection can opt into.
///
/// Message and call events are always pushed; the presence and typing feeds
/// are high-volume and off until the client subscribes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feed {
    Presence,
    Typing,
}

/// An event pushed from the server to a live connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// A persisted chat message fanned out to a recipient.
    MessageReceived { message: PersistedMessage },
    /// A recipient read one of this user's messages.
    ReadReceipt {
        message_id: MessageId,
        reader_id: UserId,
        read_at: DateTime<Utc>,
    },
    /// A user's derived presence changed.
    PresenceChanged { record: PresenceRecord },
    /// Another participant started typing in a conversation.
    TypingStarted {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    /// Another participant stopped typing in a conversation.
    TypingStopped {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    /// This user's initiate went through; the callee is being rung.
    CallRinging {
        call_id: CallId,
        callee_id: UserId,
        mode: CallMode,
    },
    /// Someone is calling this user.
    IncomingCall {
        call_id: CallId,
        caller_id: UserId,
        mode: CallMode,
    },
    /// The callee accepted; signaling may proceed.
    CallAccepted { call_id: CallId },
    /// An opaque session-description or network-candidate payload relayed
    /// from the other party.
    CallSignal {
        call_id: CallId,
        payload: serde_json::Value,
    },
    /// The call reached its terminal state.
    CallEnded { call_id: CallId, reason: EndReason },
    /// Acknowledgement of a `Subscribe` command.
    Subscribed { feeds: Vec<Feed> },
    /// Reply to a `QueryPresence` command.
    PresenceState { records: Vec<PresenceRecord> },
    /// A command could not be applied; the session itself is unaffected.
    CommandRejected {
        reason: RejectReason,
        detail: String,
    },
}

/// A client-invocable operation sent over the persistent connection.
///
/// Connection admission is not a command: it is the transport lifecycle,
/// observed by the registry when the socket opens and closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Opt this connection into additional event feeds.
    Subscribe { feeds: Vec<Feed> },
    /// Ask for the current presence of the listed users (all online users
    /// when the list is empty).
    QueryPresence { user_ids: Vec<UserId> },
    /// The sender persisted a message through the message collaborator
    /// and asks for it to be fanned out to its recipients.
    NotifyMessageSent { message: PersistedMessage },
    /// The reader has seen a message; notify its sender.
    MarkRead { message_id: MessageId },
    StartTyping { conversation_id: ConversationId },
    StopTyping { conversation_id: ConversationId },
    /// Upsert this user's signaling address (last writer wins).
    RegisterSignalingAddress { address: String },
    InitiateCall { callee_id: UserId, mode: CallMode },
    AcceptCall { call_id: CallId },
    RejectCall { call_id: CallId },
    EndCall { call_id: CallId },
    RelaySignal {
        call_id: CallId,
        payload: serde_json::Value,
    },
}

/// Why a command was rejected, mirroring the error taxonomy of the session
/// layer. Rejections are per-command; they never tear down the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// The referenced connection, call, or message is unknown.
    NotFound,
    /// The operation conflicts with existing state (e.g. a second call to
    /// the same pair).
    Conflict,
    /// The target has no live connection or signaling address.
    Unreachable,
    /// The operation is not valid in the current lifecycle state.
    InvalidState,
    /// The command payload could not be understood.
    Malformed,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "not-found",
            RejectReason::Conflict => "conflict",
            RejectReason::Unreachable => "unreachable",
            RejectReason::InvalidState => "invalid-state",
            RejectReason::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
