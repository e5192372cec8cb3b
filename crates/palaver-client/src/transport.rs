//! Transport boundary for the client session.
//!
//! The connection manager is generic over [`SessionTransport`] so the
//! reconnect/restore logic can be exercised without a network;
//! [`WsTransport`] is the production WebSocket implementation.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use palaver_core::{ClientCommand, Feed, ServerEvent};

use crate::error::ClientError;

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/v1/session`.
    pub server_url: String,
    /// Bearer token from the identity service.
    pub token: String,
    /// Device label reported to the server.
    pub device: String,
    /// Feeds to subscribe after every (re)connect.
    pub subscriptions: Vec<Feed>,
    /// Signaling address to re-register after every (re)connect, when
    /// this client takes calls.
    pub signaling_address: Option<String>,
    /// Maximum reconnect attempts; 0 means retry forever.
    pub max_reconnect_attempts: u32,
}

/// A message-framed, ordered, bidirectional session transport.
pub trait SessionTransport: Sized {
    async fn connect(config: &ClientConfig) -> Result<Self, ClientError>;

    async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError>;

    async fn recv(&mut self) -> Result<ServerEvent, ClientError>;

    async fn close(&mut self) -> Result<(), ClientError>;
}

/// WebSocket transport over tokio-tungstenite.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    fn session_url(config: &ClientConfig) -> Result<url::Url, ClientError> {
        let mut url = url::Url::parse(&config.server_url)
            .map_err(|error| ClientError::ConnectFailed(error.to_string()))?;
        url.query_pairs_mut()
            .append_pair("token", &config.token)
            .append_pair("device", &config.device);
        Ok(url)
    }
}

impl SessionTransport for WsTransport {
    async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let url = Self::session_url(config)?;
        let (stream, _response) = connect_async(url.as_str()).await.map_err(|error| {
            match &error {
                tokio_tungstenite::tungstenite::Error::Http(response)
                    if response.status() == 401 =>
                {
                    ClientError::AuthenticationFailed("server refused the token".to_string())
                }
                _ => ClientError::ConnectFailed(error.to_string()),
            }
        })?;
        Ok(Self { stream })
    }

    async fn send(&mut self, command: &ClientCommand) -> Result<(), ClientError> {
        let frame = serde_json::to_string(command)
            .map_err(|error| ClientError::Protocol(error.to_string()))?;
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|error| ClientError::TransportError(error.to_string()))
    }

    async fn recv(&mut self) -> Result<ServerEvent, ClientError> {
        loop {
            let Some(frame) = self.stream.next().await else {
                return Err(ClientError::Closed);
            };
            let message =
                frame.map_err(|error| ClientError::TransportError(error.to_string()))?;
            match message {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str())
                        .map_err(|error| ClientError::Protocol(error.to_string()));
                }
                Message::Ping(data) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|error| ClientError::TransportError(error.to_string()))?;
                }
                Message::Close(_) => return Err(ClientError::Closed),
                // Binary frames and raw protocol frames are not part of
                // the session protocol.
                _ => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ClientError> {
        self.stream
            .close(None)
            .await
            .map_err(|error| ClientError::TransportError(error.to_string()))
    }
}
