//! Membership collaborator client.
//!
//! Group membership and conversation participants are resolved on demand
//! against the collaborator's REST surface; nothing is cached here, the
//! collaborator owns the truth.

use async_trait::async_trait;

use palaver_core::{ConversationId, GroupId, UserId};
use palaver_realtime::{MembershipDirectory, RealtimeError};

/// REST-backed [`MembershipDirectory`].
pub struct RestDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl RestDirectory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_members(&self, path: String) -> Result<Vec<UserId>, RealtimeError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| RealtimeError::directory(error.to_string()))?;

        if !response.status().is_success() {
            return Err(RealtimeError::directory(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        let members: Vec<String> = response
            .json()
            .await
            .map_err(|error| RealtimeError::directory(error.to_string()))?;
        Ok(members.into_iter().map(UserId::new).collect())
    }
}

#[async_trait]
impl MembershipDirectory for RestDirectory {
    async fn group_members(&self, group: &GroupId) -> Result<Vec<UserId>, RealtimeError> {
        self.fetch_members(format!("/v1/groups/{group}/members")).await
    }

    async fn conversation_participants(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<UserId>, RealtimeError> {
        self.fetch_members(format!("/v1/conversations/{conversation}/participants"))
            .await
    }
}

/// Fallback when no membership collaborator is configured. Direct
/// messages still flow; group fan-out and typing resolve to nobody.
pub struct EmptyDirectory;

#[async_trait]
impl MembershipDirectory for EmptyDirectory {
    async fn group_members(&self, _group: &GroupId) -> Result<Vec<UserId>, RealtimeError> {
        Ok(Vec::new())
    }

    async fn conversation_participants(
        &self,
        _conversation: &ConversationId,
    ) -> Result<Vec<UserId>, RealtimeError> {
        Ok(Vec::new())
    }
}
