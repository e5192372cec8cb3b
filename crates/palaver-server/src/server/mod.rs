//! HTTP/WebSocket surface of the realtime server.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use palaver_core::{Feed, ServerEvent};

use crate::state::AppState;

mod internal;
mod ws;

/// Create the Axum router with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/session", get(ws::session_handler))
        .route("/internal/v1/deliver", post(internal::deliver_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
}

/// Serve until the shutdown token fires.
pub async fn start(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    tokio::spawn(presence_bridge(state.clone(), shutdown.clone()));

    let app = create_router(state);
    info!(addr = %listener.local_addr()?, "Realtime server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Bridge presence transitions onto every connection that subscribed to
/// the presence feed.
async fn presence_bridge(state: Arc<AppState>, shutdown: CancellationToken) {
    let mut transitions = state.presence.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = transitions.recv() => match next {
                Ok(record) => {
                    state
                        .registry
                        .broadcast_feed(Feed::Presence, &ServerEvent::PresenceChanged { record });
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(count, "Presence bridge lagged; transitions dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Health endpoint for load balancers.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.registry.connection_count(),
        "activeCalls": state.signaling.active_call_count(),
    }))
}
