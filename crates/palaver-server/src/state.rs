//! Shared server state: the session layer services plus the collaborator
//! boundaries, built once and handed to every handler.

use std::sync::Arc;

use palaver_realtime::{
    CallSignaling, ConnectionRegistry, FanoutPipeline, MembershipDirectory, PresenceService,
    TypingChannel,
};

use crate::auth::Authenticator;
use crate::config::ServerConfig;

pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: PresenceService,
    pub fanout: FanoutPipeline,
    pub typing: TypingChannel,
    pub signaling: Arc<CallSignaling>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Shared secret for the internal delivery endpoint, if configured.
    pub internal_token: Option<String>,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        authenticator: Arc<dyn Authenticator>,
        directory: Arc<dyn MembershipDirectory>,
    ) -> Arc<Self> {
        let realtime = config.session.realtime();
        let registry = Arc::new(ConnectionRegistry::new(&realtime));
        let presence = PresenceService::new(registry.clone());
        let fanout = FanoutPipeline::new(registry.clone(), directory.clone());
        let typing = TypingChannel::new(registry.clone(), directory);
        let signaling = Arc::new(CallSignaling::new(&realtime, registry.clone()));

        Arc::new(Self {
            registry,
            presence,
            fanout,
            typing,
            signaling,
            authenticator,
            internal_token: config.listen.internal_token.clone(),
            queue_capacity: realtime.outbound_queue_capacity,
        })
    }
}
