//! # palaver-client
//!
//! Client-side counterpart of the realtime session layer: a pluggable
//! transport plus a connection manager that re-establishes the transport
//! with backoff and restores the session (feed subscriptions, signaling
//! address) after every reconnect, since the server treats each new
//! connection as fresh.

mod connection;
mod error;
mod transport;

pub use connection::{ConnectionManager, ConnectionState, SessionNotice};
pub use error::ClientError;
pub use transport::{ClientConfig, SessionTransport, WsTransport};
