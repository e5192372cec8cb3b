//! Presence derivation.
//!
//! Presence is computed from the Connection Registry, never stored on its
//! own, so it cannot drift from the set of live connections. Transitions
//! are published by the registry at the moment they occur; this service is
//! the read-side facade.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use palaver_core::{PresenceRecord, PresenceStatus, UserId};

use crate::registry::ConnectionRegistry;

/// Read access to derived presence.
#[derive(Clone)]
pub struct PresenceService {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceService {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Current status, consistent with the registry at the instant queried.
    pub fn current_status(&self, user_id: &UserId) -> PresenceStatus {
        self.registry.status_of(user_id)
    }

    /// Presence records for the requested users, or for every online user
    /// when the request is empty.
    pub fn query(&self, user_ids: &[UserId]) -> Vec<PresenceRecord> {
        if user_ids.is_empty() {
            return self.snapshot();
        }
        let online: HashMap<UserId, PresenceRecord> = self
            .snapshot()
            .into_iter()
            .map(|record| (record.user_id.clone(), record))
            .collect();
        user_ids
            .iter()
            .map(|user_id| {
                online.get(user_id).cloned().unwrap_or_else(|| PresenceRecord {
                    user_id: user_id.clone(),
                    status: PresenceStatus::Offline,
                    last_changed_at: chrono::Utc::now(),
                })
            })
            .collect()
    }

    /// Records for every currently-online user.
    pub fn snapshot(&self) -> Vec<PresenceRecord> {
        self.registry.online_records()
    }

    /// Stream of presence transitions. For any single user, events arrive
    /// in the order they occurred; cross-user ordering is not guaranteed.
    pub fn subscribe(&self) -> broadcast::Receiver<PresenceRecord> {
        self.registry.subscribe_transitions()
    }
}
