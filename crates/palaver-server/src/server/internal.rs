//! Delivery ingress for the persisted-message collaborator.
//!
//! The collaborator persists the message first, then hands it here for
//! fan-out; this server never writes messages itself.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use palaver_core::PersistedMessage;

use crate::state::AppState;

const INTERNAL_TOKEN_HEADER: &str = "x-palaver-internal";

/// POST /internal/v1/deliver
pub async fn deliver_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(message): Json<PersistedMessage>,
) -> Response {
    if let Some(expected) = &state.internal_token {
        let presented = headers
            .get(INTERNAL_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            warn!("Delivery request with missing or bad internal token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match state.fanout.deliver(&message).await {
        Ok(outcome) => {
            debug!(
                message_id = %outcome.message_id,
                delivered = outcome.delivered.len(),
                undelivered = outcome.undelivered.len(),
                "Delivery handled"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(error) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}
