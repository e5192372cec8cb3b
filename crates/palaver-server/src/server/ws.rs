//! WebSocket transport: one actor per connection.
//!
//! The socket splits into a writer task that drains the connection's
//! bounded event queue and a reader loop that dispatches client commands.
//! Admission happens after the identity collaborator confirms the token;
//! the registry observes the socket's whole lifetime, so a connection can
//! never outlive its transport.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use palaver_core::{
    ClientCommand, ConnectionId, DeviceTag, EndReason, Feed, PresenceStatus, RejectReason,
    ServerEvent, UserId,
};
use palaver_realtime::{ConnectionHandle, RealtimeError};

use crate::auth::AuthError;
use crate::state::AppState;

/// Server pings every 30 seconds; a connection that misses the pong
/// window is presumed dead and closed, so the registry never accumulates
/// entries for vanished transports.
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct SessionParams {
    /// Bearer token issued by the identity collaborator.
    token: String,
    /// Client-chosen device label.
    #[serde(default = "default_device")]
    device: String,
}

fn default_device() -> String {
    "unknown".to_string()
}

/// GET /v1/session
///
/// Authenticates the token, then upgrades to the persistent connection.
pub async fn session_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<SessionParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = match state.authenticator.authenticate(&params.token).await {
        Ok(user_id) => user_id,
        Err(AuthError::Rejected) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(AuthError::Unavailable(error)) => {
            warn!(%error, "Identity collaborator unavailable");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let device = DeviceTag::new(params.device);
    ws.on_upgrade(move |socket| run_connection(socket, state, user_id, device))
}

/// Frames the writer task sends besides session events.
enum WsControl {
    Pong(Vec<u8>),
}

/// Drive one admitted connection until the socket or the registry closes
/// it.
async fn run_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: UserId,
    device: DeviceTag,
) {
    let (ws_sender, ws_receiver) = socket.split();

    let (event_tx, event_rx) = mpsc::channel(state.queue_capacity);
    let (control_tx, control_rx) = mpsc::channel(8);
    let (pong_tx, pong_rx) = watch::channel(Instant::now());

    let connection_id = ConnectionId::generate();
    let handle = state
        .registry
        .admit(user_id.clone(), connection_id, device, event_tx);
    let closer = handle.closed();

    info!(user = %user_id, connection = %connection_id, "Connection admitted");

    let writer = tokio::spawn(writer_task(
        ws_sender,
        event_rx,
        control_rx,
        pong_rx,
        closer.clone(),
    ));

    read_loop(
        ws_receiver,
        &state,
        &handle,
        &user_id,
        connection_id,
        &control_tx,
        &pong_tx,
        &closer,
    )
    .await;

    writer.abort();
    state.registry.remove(connection_id);

    // Disconnect hygiene: once the user's last connection is gone their
    // signaling address is stale and any call they were in cannot
    // continue.
    if state.registry.status_of(&user_id) == PresenceStatus::Offline {
        state.signaling.clear_address(&user_id);
        let ended = state.signaling.end_calls_for(&user_id, EndReason::Error).await;
        if ended > 0 {
            info!(user = %user_id, ended, "Ended calls for disconnected user");
        }
    }

    info!(user = %user_id, connection = %connection_id, "Connection closed");
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    user_id: &UserId,
    connection_id: ConnectionId,
    control_tx: &mpsc::Sender<WsControl>,
    pong_tx: &watch::Sender<Instant>,
    closer: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = closer.cancelled() => {
                debug!(connection = %connection_id, "Registry tore the connection down");
                break;
            }
            next = ws_receiver.next() => match next {
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(state, handle, user_id, connection_id, &text).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(user = %user_id, "Ignoring binary frame (protocol is JSON text)");
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = control_tx.send(WsControl::Pong(data)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    let _ = pong_tx.send(Instant::now());
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(user = %user_id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(error)) => {
                    warn!(user = %user_id, %error, "WebSocket receive error");
                    break;
                }
                None => {
                    info!(user = %user_id, "WebSocket stream ended");
                    break;
                }
            },
        }
    }
}

/// Writer task: forwards queued session events and control frames to the
/// socket, and runs the keepalive.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut controls: mpsc::Receiver<WsControl>,
    pong_rx: watch::Receiver<Instant>,
    closer: CancellationToken,
) {
    let mut ping_timer = tokio::time::interval(PING_INTERVAL);
    // Skip the first immediate tick.
    ping_timer.tick().await;

    loop {
        tokio::select! {
            _ = closer.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: 1008,
                        reason: "connection torn down".into(),
                    })))
                    .await;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(frame) => {
                        if sink.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => warn!(%error, "Failed to encode server event"),
                }
            }
            control = controls.recv() => {
                match control {
                    Some(WsControl::Pong(data)) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping_timer.tick() => {
                if pong_rx.borrow().elapsed() > PING_INTERVAL + PONG_TIMEOUT {
                    warn!("Pong timeout, closing connection");
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Decode one text frame and apply it.
async fn dispatch_frame(
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    user_id: &UserId,
    connection_id: ConnectionId,
    text: &str,
) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(error) => {
            debug!(user = %user_id, %error, "Unparseable command frame");
            state.registry.push_to_connection(
                connection_id,
                ServerEvent::CommandRejected {
                    reason: RejectReason::Malformed,
                    detail: error.to_string(),
                },
            );
            return;
        }
    };
    dispatch_command(state, handle, user_id, connection_id, command).await;
}

async fn dispatch_command(
    state: &Arc<AppState>,
    handle: &ConnectionHandle,
    user_id: &UserId,
    connection_id: ConnectionId,
    command: ClientCommand,
) {
    match command {
        ClientCommand::Subscribe { feeds } => {
            for feed in &feeds {
                handle.enable_feed(*feed);
            }
            state.registry.push_to_connection(
                connection_id,
                ServerEvent::Subscribed {
                    feeds: feeds.clone(),
                },
            );
            // A fresh presence subscriber starts from the current state.
            if feeds.contains(&Feed::Presence) {
                state.registry.push_to_connection(
                    connection_id,
                    ServerEvent::PresenceState {
                        records: state.presence.snapshot(),
                    },
                );
            }
        }
        ClientCommand::QueryPresence { user_ids } => {
            let records = state.presence.query(&user_ids);
            state
                .registry
                .push_to_connection(connection_id, ServerEvent::PresenceState { records });
        }
        ClientCommand::NotifyMessageSent { message } => {
            if &message.sender_id != user_id {
                state.registry.push_to_connection(
                    connection_id,
                    ServerEvent::CommandRejected {
                        reason: RejectReason::Malformed,
                        detail: "sender does not match the authenticated user".to_string(),
                    },
                );
                return;
            }
            if let Err(error) = state.fanout.deliver(&message).await {
                reject(state, connection_id, &error);
            }
        }
        ClientCommand::MarkRead { message_id } => {
            if let Err(error) = state.fanout.mark_read(&message_id, user_id) {
                reject(state, connection_id, &error);
            }
        }
        ClientCommand::StartTyping { conversation_id } => {
            state.typing.notify_typing(user_id, &conversation_id).await;
        }
        ClientCommand::StopTyping { conversation_id } => {
            state
                .typing
                .notify_stop_typing(user_id, &conversation_id)
                .await;
        }
        ClientCommand::RegisterSignalingAddress { address } => {
            state.signaling.register_address(user_id.clone(), address);
        }
        ClientCommand::InitiateCall { callee_id, mode } => {
            if let Err(error) = state
                .signaling
                .initiate(user_id.clone(), callee_id, mode)
                .await
            {
                reject(state, connection_id, &error);
            }
        }
        ClientCommand::AcceptCall { call_id } => {
            if let Err(error) = state.signaling.accept(call_id, user_id).await {
                reject(state, connection_id, &error);
            }
        }
        ClientCommand::RejectCall { call_id } => {
            if let Err(error) = state
                .signaling
                .end(call_id, user_id, EndReason::Rejected)
                .await
            {
                reject(state, connection_id, &error);
            }
        }
        ClientCommand::EndCall { call_id } => {
            if let Err(error) = state
                .signaling
                .end(call_id, user_id, EndReason::Hangup)
                .await
            {
                reject(state, connection_id, &error);
            }
        }
        ClientCommand::RelaySignal { call_id, payload } => {
            if let Err(error) = state.signaling.relay_signal(call_id, user_id, payload).await {
                reject(state, connection_id, &error);
            }
        }
    }
}

fn reject(state: &Arc<AppState>, connection_id: ConnectionId, error: &RealtimeError) {
    state.registry.push_to_connection(
        connection_id,
        ServerEvent::CommandRejected {
            reason: error.reject_reason(),
            detail: error.to_string(),
        },
    );
}
