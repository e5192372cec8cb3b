//! Server configuration.
//!
//! Loaded from a TOML file (all sections optional), with environment
//! overrides for the values that differ between deployments:
//! `PALAVER_BIND` and `PALAVER_INTERNAL_TOKEN`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use palaver_realtime::RealtimeConfig;

/// Listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the HTTP/WebSocket listener binds.
    pub bind: SocketAddr,
    /// Shared secret the persisted-message collaborator must present on
    /// the internal delivery endpoint. Unset means the endpoint is open
    /// (development only).
    pub internal_token: Option<String>,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            internal_token: None,
        }
    }
}

/// Session layer tunables, mirrored into [`RealtimeConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds an unanswered call rings before timing out.
    pub ring_timeout_secs: u64,
    /// Outbound event queue capacity per connection.
    pub outbound_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: 30,
            outbound_queue_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn realtime(&self) -> RealtimeConfig {
        RealtimeConfig::default()
            .with_ring_timeout(std::time::Duration::from_secs(self.ring_timeout_secs))
            .with_outbound_queue_capacity(self.outbound_queue_capacity)
    }
}

/// Where the external collaborators live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollaboratorConfig {
    /// Base URL of the group-membership collaborator.
    pub directory_url: Option<String>,
    /// Base URL of the identity collaborator.
    pub identity_url: Option<String>,
    /// Development fallback when no identity collaborator is configured:
    /// a static token → user id map.
    pub static_tokens: HashMap<String, String>,
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: ListenConfig,
    pub session: SessionConfig,
    pub collaborators: CollaboratorConfig,
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// no path is given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(bind) = std::env::var("PALAVER_BIND") {
            config.listen.bind = bind
                .parse()
                .context("PALAVER_BIND is not a valid socket address")?;
        }
        if let Ok(token) = std::env::var("PALAVER_INTERNAL_TOKEN") {
            config.listen.internal_token = Some(token);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen.bind.port(), 8080);
        assert_eq!(config.session.ring_timeout_secs, 30);
        assert!(config.collaborators.directory_url.is_none());
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config: ServerConfig = toml::from_str(
            r#"
            [session]
            ring_timeout_secs = 45

            [collaborators]
            directory_url = "http://directory.internal"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.ring_timeout_secs, 45);
        assert_eq!(config.session.outbound_queue_capacity, 256);
        assert_eq!(
            config.collaborators.directory_url.as_deref(),
            Some("http://directory.internal")
        );
    }

    #[test]
    fn session_config_maps_into_realtime_config() {
        let session = SessionConfig {
            ring_timeout_secs: 10,
            outbound_queue_capacity: 32,
        };
        let realtime = session.realtime();
        assert_eq!(realtime.ring_timeout, std::time::Duration::from_secs(10));
        assert_eq!(realtime.outbound_queue_capacity, 32);
    }
}
