//! Message fan-out pipeline.
//!
//! Messages arrive here already durably persisted by an external
//! collaborator; this pipeline only resolves the recipients' live
//! connections, pushes the event, and tracks delivery/read
//! acknowledgements. A recipient with no live connections is left
//! undelivered; they will fetch unread history on their next connect,
//! which is outside this layer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, instrument};

use palaver_core::{DeliveryRecord, MessageId, PersistedMessage, Recipient, ServerEvent, UserId};

use crate::error::RealtimeError;
use crate::registry::ConnectionRegistry;
use crate::MembershipDirectory;

/// Result of one delivery attempt.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub message_id: MessageId,
    /// Recipients that had at least one live connection.
    pub delivered: Vec<UserId>,
    /// Recipients with no live connections; not an error.
    pub undelivered: Vec<UserId>,
    /// Total connections the event was queued on.
    pub connections_pushed: usize,
}

impl DeliveryOutcome {
    pub fn fully_delivered(&self) -> bool {
        self.undelivered.is_empty()
    }
}

/// Delivery state for one in-flight message.
#[derive(Debug)]
struct MessageDelivery {
    sender_id: UserId,
    records: HashMap<UserId, DeliveryRecord>,
}

/// Pushes persisted messages to recipients and routes read receipts back
/// to senders.
pub struct FanoutPipeline {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn MembershipDirectory>,
    deliveries: DashMap<MessageId, MessageDelivery>,
}

impl FanoutPipeline {
    pub fn new(registry: Arc<ConnectionRegistry>, directory: Arc<dyn MembershipDirectory>) -> Self {
        Self {
            registry,
            directory,
            deliveries: DashMap::new(),
        }
    }

    /// Push a persisted message to every live connection of its
    /// recipients.
    ///
    /// Never retried from here: redelivery to recipients that were offline
    /// happens through the external history API on their next connect.
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    pub async fn deliver(
        &self,
        message: &PersistedMessage,
    ) -> Result<DeliveryOutcome, RealtimeError> {
        let recipients = self.resolve_recipients(message).await?;

        let event = ServerEvent::MessageReceived {
            message: message.clone(),
        };

        let mut outcome = DeliveryOutcome {
            message_id: message.message_id.clone(),
            delivered: Vec::new(),
            undelivered: Vec::new(),
            connections_pushed: 0,
        };
        let mut records = HashMap::with_capacity(recipients.len());

        for recipient in recipients {
            let pushed = self.registry.push_to_user(&recipient, &event);
            outcome.connections_pushed += pushed;
            if pushed > 0 {
                outcome.delivered.push(recipient.clone());
            } else {
                outcome.undelivered.push(recipient.clone());
            }
            records.insert(
                recipient.clone(),
                DeliveryRecord {
                    message_id: message.message_id.clone(),
                    recipient_id: recipient,
                    delivered: pushed > 0,
                    read: false,
                    read_at: None,
                },
            );
        }

        if !records.is_empty() {
            self.deliveries.insert(
                message.message_id.clone(),
                MessageDelivery {
                    sender_id: message.sender_id.clone(),
                    records,
                },
            );
        }

        debug!(
            delivered = outcome.delivered.len(),
            undelivered = outcome.undelivered.len(),
            connections = outcome.connections_pushed,
            "Message fanned out"
        );
        Ok(outcome)
    }

    /// Record that a recipient read a message and push a read receipt to
    /// the sender's live connections.
    ///
    /// Idempotent for repeated reads; unknown message ids or non-recipient
    /// readers are rejected cleanly without mutating anything.
    #[instrument(skip(self), fields(message_id = %message_id, reader_id = %reader_id))]
    pub fn mark_read(
        &self,
        message_id: &MessageId,
        reader_id: &UserId,
    ) -> Result<(), RealtimeError> {
        let (sender_id, read_at, fully_read, already_read) = {
            let mut delivery = self
                .deliveries
                .get_mut(message_id)
                .ok_or_else(|| RealtimeError::MessageNotFound(message_id.clone()))?;

            let record = delivery
                .records
                .get_mut(reader_id)
                .ok_or_else(|| RealtimeError::MessageNotFound(message_id.clone()))?;

            let already_read = record.read;
            let read_at = record.read_at.unwrap_or_else(Utc::now);
            record.read = true;
            record.read_at = Some(read_at);

            let fully_read = delivery.records.values().all(|r| r.read);
            (delivery.sender_id.clone(), read_at, fully_read, already_read)
        };

        // Fully-read messages no longer need tracking.
        if fully_read {
            self.deliveries.remove(message_id);
        }

        if !already_read {
            self.registry.push_to_user(
                &sender_id,
                &ServerEvent::ReadReceipt {
                    message_id: message_id.clone(),
                    reader_id: reader_id.clone(),
                    read_at,
                },
            );
        }
        Ok(())
    }

    /// Current delivery record for a recipient, while the delivery is
    /// still being tracked.
    pub fn delivery_record(
        &self,
        message_id: &MessageId,
        recipient_id: &UserId,
    ) -> Option<DeliveryRecord> {
        self.deliveries
            .get(message_id)
            .and_then(|delivery| delivery.records.get(recipient_id).cloned())
    }

    async fn resolve_recipients(
        &self,
        message: &PersistedMessage,
    ) -> Result<Vec<UserId>, RealtimeError> {
        match &message.recipient {
            Recipient::User(user_id) => Ok(vec![user_id.clone()]),
            Recipient::Group(group_id) => {
                let members = self.directory.group_members(group_id).await?;
                Ok(members
                    .into_iter()
                    .filter(|member| member != &message.sender_id)
                    .collect())
            }
        }
    }
}
