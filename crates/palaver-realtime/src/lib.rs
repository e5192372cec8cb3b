//! # palaver-realtime
//!
//! The realtime session layer for Palaver: tracks which users are
//! reachable, fans chat events out to their live connections, and drives
//! the signaling state machine that sets up a peer-to-peer call.
//!
//! ## Architecture
//!
//! - [`registry::ConnectionRegistry`]: user to live connections, the
//!   single source of truth for reachability
//! - [`presence::PresenceService`]: online/offline derived from registry
//!   transitions, never stored independently
//! - [`fanout::FanoutPipeline`]: pushes persisted messages to recipients
//!   and tracks delivery/read acknowledgements
//! - [`typing::TypingChannel`]: ephemeral best-effort typing broadcasts
//! - [`signaling::CallSignaling`]: the call lifecycle state machine and
//!   blind signal relay
//!
//! Everything that is not session state lives behind a collaborator
//! boundary: messages arrive already persisted, group membership is
//! resolved through [`MembershipDirectory`], and user identity is
//! authenticated before a connection is admitted. Nothing in this crate
//! is fatal to the process; the worst outcome of any failure is one torn
//! down connection or one ended call.

pub mod config;
pub mod error;
pub mod fanout;
pub mod presence;
pub mod registry;
pub mod signaling;
pub mod typing;

pub use config::RealtimeConfig;
pub use error::RealtimeError;
pub use fanout::{DeliveryOutcome, FanoutPipeline};
pub use presence::PresenceService;
pub use registry::{ConnectionHandle, ConnectionRegistry, PushOutcome};
pub use signaling::{CallSignaling, CallSnapshot, CallState};
pub use typing::TypingChannel;

use palaver_core::{ConversationId, GroupId, UserId};

/// Resolves conversation and group membership on demand.
///
/// Implemented over the membership collaborator (a conventional
/// request/response service). Results are not cached here: membership can
/// change between deliveries and the collaborator owns the truth.
#[async_trait::async_trait]
pub trait MembershipDirectory: Send + Sync + 'static {
    /// The current member ids of a group.
    async fn group_members(&self, group: &GroupId) -> Result<Vec<UserId>, RealtimeError>;

    /// The current participant ids of a conversation (including the
    /// requesting user, if a participant).
    async fn conversation_participants(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<UserId>, RealtimeError>;
}
