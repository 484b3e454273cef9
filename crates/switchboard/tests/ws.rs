// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Browser sessions over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use switchboard::state::AppState;
use switchboard::test_support::{spawn_http_server, test_config, test_state};

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn server() -> anyhow::Result<(SocketAddr, Arc<AppState>)> {
    let mut config = test_config()?;
    config.ws_max_message_bytes = 256;
    let state = test_state(config);
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;
    Ok((addr, state))
}

/// Connect as `extension` and consume the welcome.
async fn join(addr: SocketAddr, extension: &str) -> anyhow::Result<Client> {
    let url = format!("ws://{addr}/ws?extension={extension}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await?;
    let welcome = next_json(&mut ws).await?;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["status"], "connected");
    Ok(ws)
}

/// Next text message as JSON, skipping control frames.
async fn next_json(ws: &mut Client) -> anyhow::Result<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

async fn send_json(ws: &mut Client, value: Value) -> anyhow::Result<()> {
    ws.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn session_registers_under_extension() -> anyhow::Result<()> {
    let (addr, state) = server().await?;
    let _ws = join(addr, "1000").await?;

    assert!(wait_until(|| state.hub.is_extension_connected("1000")).await);
    assert_eq!(state.hub.extension_client_count("1000"), 1);
    Ok(())
}

#[tokio::test]
async fn ping_gets_pong() -> anyhow::Result<()> {
    let (addr, _state) = server().await?;
    let mut ws = join(addr, "1000").await?;

    send_json(&mut ws, json!({"type": "ping"})).await?;
    assert_eq!(next_json(&mut ws).await?["type"], "pong");
    Ok(())
}

#[tokio::test]
async fn offer_is_relayed_to_every_callee_device() -> anyhow::Result<()> {
    let (addr, state) = server().await?;
    let mut caller = join(addr, "1000").await?;
    let mut desk = join(addr, "1001").await?;
    let mut phone = join(addr, "1001").await?;
    assert!(wait_until(|| state.hub.extension_client_count("1001") == 2).await);

    let offer = json!({"type": "webrtc_offer", "from": "1000", "to": "1001", "data": {"sdp": "v=0"}});
    send_json(&mut caller, offer).await?;

    for ws in [&mut desk, &mut phone] {
        let got = next_json(ws).await?;
        assert_eq!(got["type"], "webrtc_offer");
        assert_eq!(got["data"]["sdp"], "v=0");
    }
    Ok(())
}

#[tokio::test]
async fn server_push_reaches_session() -> anyhow::Result<()> {
    let (addr, state) = server().await?;
    let mut ws = join(addr, "1001").await?;
    assert!(wait_until(|| state.hub.is_extension_connected("1001")).await);

    state.hub.notify_incoming_call("1000", "1001", "PJSIP/1000-00000001")?;
    let got = next_json(&mut ws).await?;
    assert_eq!(got["type"], "incoming_call");
    assert_eq!(got["caller"], "1000");
    assert_eq!(got["status"], "ringing");
    Ok(())
}

#[tokio::test]
async fn closing_socket_unregisters() -> anyhow::Result<()> {
    let (addr, state) = server().await?;
    let mut ws = join(addr, "1000").await?;
    let mut watcher = join(addr, "1001").await?;
    assert!(wait_until(|| state.hub.client_count() == 2).await);

    ws.close(None).await?;
    assert!(wait_until(|| !state.hub.is_extension_connected("1000")).await);

    // No disconnect callback installed: peers hear the offline status.
    let got = next_json(&mut watcher).await?;
    assert_eq!(got["type"], "user_status");
    assert_eq!(got["from"], "1000");
    assert_eq!(got["status"], "offline");
    Ok(())
}

#[tokio::test]
async fn oversized_message_drops_session() -> anyhow::Result<()> {
    let (addr, state) = server().await?;
    let mut ws = join(addr, "1000").await?;
    assert!(wait_until(|| state.hub.is_extension_connected("1000")).await);

    let blob = "x".repeat(1024);
    let _ = send_json(&mut ws, json!({"type": "user_status", "status": blob})).await;
    assert!(wait_until(|| !state.hub.is_extension_connected("1000")).await);
    Ok(())
}

#[tokio::test]
async fn missing_extension_is_refused() -> anyhow::Result<()> {
    let (addr, _state) = server().await?;
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    assert!(result.is_err());
    Ok(())
}
