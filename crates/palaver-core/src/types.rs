//! Identifiers and the session-layer data model.
//!
//! Identity here is opaque: the realtime layer never parses user ids or
//! addresses, it only routes by them. Connection and call ids are minted
//! process-locally as UUIDs; everything else arrives from collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh process-unique id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

string_id! {
    /// An authenticated user identity, supplied by the identity collaborator.
    UserId
}

string_id! {
    /// Client-chosen label for the device behind a connection (e.g. "desktop").
    DeviceTag
}

string_id! {
    /// A 1:1 or group conversation, as known to the persistence collaborators.
    ConversationId
}

string_id! {
    /// A group whose member set the membership collaborator resolves on demand.
    GroupId
}

string_id! {
    /// Unique id of a message already durably persisted by a collaborator.
    MessageId
}

uuid_id! {
    /// One live transport session between a single device and the server.
    ConnectionId
}

uuid_id! {
    /// One call-setup attempt between two users.
    CallId
}

/// Whether a user is reachable over at least one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derived online/offline state for one user.
///
/// Always consistent with the Connection Registry at the instant it was
/// produced; there is no independently stored presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_changed_at: DateTime<Utc>,
}

/// The destination of a persisted message: one user, or a group whose
/// membership is resolved at delivery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum Recipient {
    User(UserId),
    Group(GroupId),
}

/// A chat message after its durable write, as handed to the fan-out
/// pipeline by the persistence collaborator. This layer never creates or
/// stores these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMessage {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub recipient: Recipient,
    pub body: String,
    /// Opaque reference to an attachment stored elsewhere, if any.
    pub attachment_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient delivery/read state tracked by the fan-out pipeline while
/// a delivery is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub recipient_id: UserId,
    pub delivered: bool,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

/// An opaque routable identifier for a user's peer media transport.
///
/// At most one current address per user; re-registration overwrites.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingAddress {
    pub user_id: UserId,
    pub address: String,
    pub registered_at: DateTime<Utc>,
}

/// Media mode of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallMode {
    Audio,
    Video,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Hangup,
    Rejected,
    Timeout,
    Unreachable,
    Error,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Hangup => "hangup",
            EndReason::Rejected => "rejected",
            EndReason::Timeout => "timeout",
            EndReason::Unreachable => "unreachable",
            EndReason::Error => "error",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_serialize_transparently() {
        let user = UserId::new("alice");
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, "\"alice\"");

        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ConnectionId::generate(), ConnectionId::generate());
        assert_ne!(CallId::generate(), CallId::generate());
    }

    #[test]
    fn connection_id_round_trips_through_display() {
        let id = ConnectionId::generate();
        let parsed: ConnectionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn recipient_serializes_tagged() {
        let recipient = Recipient::Group(GroupId::new("g-42"));
        let json = serde_json::to_value(&recipient).unwrap();
        assert_eq!(json["kind"], "group");
        assert_eq!(json["id"], "g-42");
    }
}
