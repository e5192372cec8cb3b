//! Identity collaborator boundary.
//!
//! The session layer trusts the user id produced here and performs no
//! credential checks of its own; token issuance lives entirely in the
//! identity service.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use palaver_core::UserId;

/// Errors from the identity boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is unknown or expired; the connection is refused.
    #[error("token rejected")]
    Rejected,

    /// The identity collaborator could not be reached.
    #[error("identity collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a bearer token to an authenticated user id.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Development authenticator backed by a static token map from the config
/// file.
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .map(|user| UserId::new(user.clone()))
            .ok_or(AuthError::Rejected)
    }
}

/// Authenticator backed by the identity collaborator's REST surface.
pub struct RestAuthenticator {
    base_url: String,
    client: reqwest::Client,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user_id: String,
}

impl RestAuthenticator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        let url = format!("{}/v1/sessions/{}", self.base_url.trim_end_matches('/'), token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| AuthError::Unavailable(error.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            return Err(AuthError::Rejected);
        }
        if !response.status().is_success() {
            warn!(status = %response.status(), "Unexpected identity collaborator status");
            return Err(AuthError::Unavailable(format!(
                "status {}",
                response.status()
            )));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|error| AuthError::Unavailable(error.to_string()))?;
        Ok(UserId::new(session.user_id))
    }
}
