// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard: PBX manager client, call control and WebSocket signaling hub.

pub mod calls;
pub mod config;
pub mod error;
pub mod hub;
pub mod manager;
pub mod state;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SwitchboardConfig;
use crate::hub::Hub;
use crate::manager::{ManagerClient, ManagerEvent};
use crate::state::AppState;
use crate::transport::build_router;

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &SwitchboardConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the switchboard until SIGINT or SIGTERM.
pub async fn run(config: SwitchboardConfig) -> anyhow::Result<()> {
    let addr = config.listen_addr();
    let shutdown = CancellationToken::new();

    let hub = Hub::new(shutdown.clone());
    let (manager, events) = ManagerClient::new(config.manager_config(), shutdown.clone());

    // An unreachable PBX at startup is not fatal; the reconnect loop owns it.
    if let Err(e) = manager.start().await {
        warn!(err = %e, "initial manager connection failed, retrying in background");
    }
    spawn_event_drain(events, shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    let state = Arc::new(AppState::new(config, hub, Arc::clone(&manager), shutdown.clone()));
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("switchboard listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.clone().cancelled_owned()).await?;

    manager.close();
    Ok(())
}

/// Keep the event queue draining. Handlers that turn PBX events into
/// notifications live outside this crate.
fn spawn_event_drain(mut events: mpsc::Receiver<ManagerEvent>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => tracing::debug!(event = %event.name, fields = event.fields.len(), "pbx event"),
                    None => break,
                },
            }
        }
    });
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                shutdown.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    });
}
