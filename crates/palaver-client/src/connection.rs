//! Connection manager: transport lifecycle, reconnection with backoff,
//! and session restoration.
//!
//! The server keeps no session state across connections, so after every
//! successful (re)connect the manager re-sends the feed subscriptions and
//! the signaling address from its configuration before reporting the
//! connection as established.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use palaver_core::{ClientCommand, ServerEvent};

use crate::error::ClientError;
use crate::transport::{ClientConfig, SessionTransport};

/// Observable connection lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Lifecycle notifications emitted alongside state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Transport up and session restored.
    Established,
    /// Transport lost or a connect attempt failed.
    Lost { reason: String, will_retry: bool },
    /// About to retry after backoff.
    Reconnecting { attempt: u32 },
}

/// Manages one logical client session over a reconnecting transport.
pub struct ConnectionManager<T>
where
    T: SessionTransport,
{
    state: ConnectionState,
    config: ClientConfig,
    transport: Option<T>,
    notices: broadcast::Sender<SessionNotice>,
}

impl<T> ConnectionManager<T>
where
    T: SessionTransport,
{
    /// Retry schedule in seconds: immediate, then widening, then capped.
    const RECONNECT_SCHEDULE_SECONDS: [u64; 5] = [0, 1, 3, 5, 10];
    const NOTICE_CHANNEL_CAPACITY: usize = 64;

    pub fn new(config: ClientConfig) -> Self {
        let (notices, _) = broadcast::channel(Self::NOTICE_CHANNEL_CAPACITY);
        Self {
            state: ConnectionState::Disconnected,
            config,
            transport: None,
            notices,
        }
    }

    /// Subscribe to lifecycle notifications.
    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.clone()
    }

    /// Establish the transport, retrying per the backoff schedule, and
    /// restore the session once connected.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if matches!(self.state, ConnectionState::Connected) && self.transport.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let mut reconnect_attempt = 0_u32;

        loop {
            match T::connect(&self.config).await {
                Ok(mut transport) => {
                    if let Err(error) = self.restore_session(&mut transport).await {
                        reconnect_attempt = self
                            .handle_connect_failure(error, reconnect_attempt)
                            .await?;
                        continue;
                    }

                    self.transport = Some(transport);
                    self.state = ConnectionState::Connected;
                    self.emit(SessionNotice::Established);
                    info!("Session established");
                    return Ok(());
                }
                Err(error) => {
                    reconnect_attempt = self
                        .handle_connect_failure(error, reconnect_attempt)
                        .await?;
                }
            }
        }
    }

    /// Send a command over the live transport.
    pub async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            ClientError::TransportError("cannot send while disconnected".to_string())
        })?;
        transport.send(command).await
    }

    /// Receive the next server event.
    pub async fn recv(&mut self) -> Result<ServerEvent, ClientError> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            ClientError::TransportError("cannot receive while disconnected".to_string())
        })?;
        transport.recv().await
    }

    /// Receive the next server event, or `None` on timeout or while
    /// disconnected.
    pub async fn recv_with_timeout(
        &mut self,
        timeout_duration: Duration,
    ) -> Result<Option<ServerEvent>, ClientError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(None);
        };
        match tokio::time::timeout(timeout_duration, transport.recv()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// The transport broke mid-session: drop it and run the reconnect
    /// loop. The restored connection is fresh as far as the server is
    /// concerned; subscriptions and the signaling address are re-sent.
    pub async fn recover_after_network_interruption(
        &mut self,
        reason: String,
    ) -> Result<(), ClientError> {
        let will_retry = self.should_retry(1);

        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }
        self.state = ConnectionState::Disconnected;
        self.emit(SessionNotice::Lost { reason, will_retry });

        self.connect().await
    }

    /// Close the transport deliberately; no retry.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let was_up = !matches!(self.state, ConnectionState::Disconnected);
        let mut close_result = Ok(());
        if let Some(mut transport) = self.transport.take() {
            close_result = transport.close().await;
        }
        self.state = ConnectionState::Disconnected;
        if was_up {
            self.emit(SessionNotice::Lost {
                reason: "user requested disconnect".to_string(),
                will_retry: false,
            });
        }
        close_result
    }

    async fn restore_session(&self, transport: &mut T) -> Result<(), ClientError> {
        if !self.config.subscriptions.is_empty() {
            transport
                .send(&ClientCommand::Subscribe {
                    feeds: self.config.subscriptions.clone(),
                })
                .await?;
        }
        if let Some(address) = &self.config.signaling_address {
            transport
                .send(&ClientCommand::RegisterSignalingAddress {
                    address: address.clone(),
                })
                .await?;
        }
        debug!(
            feeds = self.config.subscriptions.len(),
            "Session restored on fresh connection"
        );
        Ok(())
    }

    async fn handle_connect_failure(
        &mut self,
        error: ClientError,
        reconnect_attempt: u32,
    ) -> Result<u32, ClientError> {
        self.transport = None;
        let next_attempt = reconnect_attempt.saturating_add(1);
        let will_retry = error.is_retryable() && self.should_retry(next_attempt);

        self.emit(SessionNotice::Lost {
            reason: error.to_string(),
            will_retry,
        });

        if !will_retry {
            self.state = ConnectionState::Disconnected;
            return Err(error);
        }

        warn!(attempt = next_attempt, %error, "Connect failed, will retry");
        self.state = ConnectionState::Reconnecting {
            attempt: next_attempt,
        };
        self.emit(SessionNotice::Reconnecting {
            attempt: next_attempt,
        });

        tokio::time::sleep(Self::reconnect_delay(next_attempt)).await;
        self.state = ConnectionState::Connecting;
        Ok(next_attempt)
    }

    fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_reconnect_attempts == 0 || attempt <= self.config.max_reconnect_attempts
    }

    fn reconnect_delay(attempt: u32) -> Duration {
        let index = (attempt.saturating_sub(1) as usize)
            .min(Self::RECONNECT_SCHEDULE_SECONDS.len() - 1);
        Duration::from_secs(Self::RECONNECT_SCHEDULE_SECONDS[index])
    }

    fn emit(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }
}
