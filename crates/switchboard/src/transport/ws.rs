// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket upgrade for browser sessions.

use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocket;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::Deserialize;

use crate::error::ErrorCode;
use crate::hub::SessionHandle;
use crate::state::AppState;
use crate::transport::pump::{read_pump, write_pump};

/// Query parameters for the session upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WsQuery {
    pub extension: Option<String>,
    /// Reserved for the authenticating layer in front of this service.
    pub token: Option<String>,
}

/// `GET /ws?extension=<id>`: upgrade to a session bound to `extension`.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let extension = match query.extension.as_deref().map(str::trim) {
        Some(ext) if !ext.is_empty() => ext.to_owned(),
        _ => {
            return ErrorCode::BadRequest
                .to_http_response("extension parameter required")
                .into_response();
        }
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_message_size(state.limits.max_message_bytes)
        .on_upgrade(move |socket| serve_session(socket, state, extension))
        .into_response()
}

/// Run one session: register with the hub, then pump until either side ends.
async fn serve_session(socket: WebSocket, state: Arc<AppState>, extension: String) {
    let limits = state.limits;
    let (session, rx) = SessionHandle::new(&extension, limits.send_queue);
    if let Err(e) = state.hub.register(Arc::clone(&session)) {
        tracing::warn!(%extension, err = %e, "failed to register session");
        return;
    }

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_pump(
        sink,
        rx,
        Arc::clone(&session),
        Arc::clone(&state.hub),
        limits,
    ));
    read_pump(stream, Arc::clone(&session), Arc::clone(&state.hub), limits).await;

    if let Err(e) = writer.await {
        tracing::debug!(session_id = %session.id, err = %e, "write pump task failed");
    }
}
