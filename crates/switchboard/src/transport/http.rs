// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers owned by the switchboard core.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub pbx: PbxHealth,
    pub ws_clients: usize,
    pub extensions: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PbxHealth {
    pub state: String,
    pub ready: bool,
    pub last_health_check_ms: Option<u64>,
}

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "running".to_owned(),
        pbx: PbxHealth {
            state: s.manager.state().as_str().to_owned(),
            ready: s.manager.is_ready(),
            last_health_check_ms: s.manager.last_health_check(),
        },
        ws_clients: s.hub.client_count(),
        extensions: s.hub.connected_extensions(),
    })
}
