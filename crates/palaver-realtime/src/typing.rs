//! Typing indicator broadcast.
//!
//! Purely ephemeral: no persistence, no retry, no delivery guarantee. A
//! lost typing event is acceptable, so the public API is infallible and
//! directory failures are only logged.

use std::sync::Arc;

use tracing::debug;

use palaver_core::{ConversationId, Feed, ServerEvent, UserId};

use crate::registry::ConnectionRegistry;
use crate::MembershipDirectory;

/// Best-effort typing notifications, fanned out to the conversation's
/// other live participants.
pub struct TypingChannel {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn MembershipDirectory>,
}

impl TypingChannel {
    pub fn new(registry: Arc<ConnectionRegistry>, directory: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            registry,
            directory,
        }
    }

    pub async fn notify_typing(&self, from: &UserId, conversation_id: &ConversationId) {
        self.broadcast(
            from,
            conversation_id,
            ServerEvent::TypingStarted {
                conversation_id: conversation_id.clone(),
                user_id: from.clone(),
            },
        )
        .await;
    }

    pub async fn notify_stop_typing(&self, from: &UserId, conversation_id: &ConversationId) {
        self.broadcast(
            from,
            conversation_id,
            ServerEvent::TypingStopped {
                conversation_id: conversation_id.clone(),
                user_id: from.clone(),
            },
        )
        .await;
    }

    async fn broadcast(&self, from: &UserId, conversation_id: &ConversationId, event: ServerEvent) {
        let participants = match self
            .directory
            .conversation_participants(conversation_id)
            .await
        {
            Ok(participants) => participants,
            Err(error) => {
                debug!(
                    conversation = %conversation_id,
                    %error,
                    "Dropping typing event: participant lookup failed"
                );
                return;
            }
        };

        for participant in participants.iter().filter(|p| *p != from) {
            self.registry
                .push_feed_to_user(participant, Feed::Typing, &event);
        }
    }
}
