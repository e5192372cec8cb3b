//! # palaver-core
//!
//! Shared types for the Palaver realtime session layer: identifiers, the
//! session-layer data model, and the typed event/command unions exchanged
//! over the persistent connection.
//!
//! This crate is deliberately transport-agnostic. The server and client
//! crates serialize [`event::ServerEvent`] and [`event::ClientCommand`]
//! as JSON frames, but nothing here depends on the framing.

pub mod event;
pub mod types;

pub use event::{ClientCommand, Feed, RejectReason, ServerEvent};
pub use types::{
    CallId, CallMode, ConnectionId, ConversationId, DeliveryRecord, DeviceTag, EndReason, GroupId,
    MessageId, PersistedMessage, PresenceRecord, PresenceStatus, Recipient, SignalingAddress,
    UserId,
};
