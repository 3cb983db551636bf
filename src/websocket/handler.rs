//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and hands established connections to
//! [`accept`](super::session::accept).

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket, WebSocketUpgrade},
        State,
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::hub::Hub;
use super::session::{accept, SessionConfig};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// A failed handshake is logged and answered with the rejection's own error
/// response; the hub never hears about it.
pub async fn websocket_handler(
    State(state): State<Arc<AppState>>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "WebSocket upgrade rejected");
            return rejection.into_response();
        }
    };

    let hub = state.hub.clone();
    let config = Arc::clone(&state.session_config);

    ws.max_message_size(config.max_message_size)
        .on_failed_upgrade(|error| {
            tracing::warn!(error = %error, "WebSocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, hub, config))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: Hub, config: Arc<SessionConfig>) {
    if let Err(e) = accept(socket, hub, config).await {
        tracing::error!(error = %e, "Failed to start WebSocket session");
    }
}
