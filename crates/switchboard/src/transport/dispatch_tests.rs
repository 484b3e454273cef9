// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{handle_text, Dispatched};
use crate::hub::{Hub, SessionHandle};

async fn join(
    hub: &Hub,
    extension: &str,
) -> anyhow::Result<(Arc<SessionHandle>, mpsc::Receiver<Utf8Bytes>)> {
    let (session, mut rx) = SessionHandle::new(extension, 16);
    hub.register(Arc::clone(&session))?;
    // welcome
    tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
    Ok((session, rx))
}

async fn next_json(rx: &mut mpsc::Receiver<Utf8Bytes>) -> anyhow::Result<Value> {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("queue closed"))?;
    Ok(serde_json::from_str(frame.as_str())?)
}

#[tokio::test]
async fn ping_queues_pong_to_sender() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (me, mut rx) = join(&hub, "1000").await?;

    assert_eq!(handle_text(&hub, &me, r#"{"type":"ping"}"#), Dispatched::Pong);
    let pong = next_json(&mut rx).await?;
    assert_eq!(pong["type"], "pong");
    assert!(pong["timestamp"].as_i64().is_some_and(|t| t > 0));
    Ok(())
}

#[tokio::test]
async fn signaling_is_relayed_verbatim() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (caller, _caller_rx) = join(&hub, "1000").await?;
    let (_callee, mut callee_rx) = join(&hub, "1001").await?;

    let offer = r#"{"type":"webrtc_offer","from":"1000","to":"1001","data":{"sdp":"v=0"}}"#;
    assert_eq!(
        handle_text(&hub, &caller, offer),
        Dispatched::Relayed { to: "1001".into(), delivered: 1 }
    );
    let got = next_json(&mut callee_rx).await?;
    assert_eq!(got["type"], "webrtc_offer");
    assert_eq!(got["from"], "1000");
    assert_eq!(got["data"], json!({"sdp": "v=0"}));
    Ok(())
}

#[tokio::test]
async fn relay_needs_a_target() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (me, _rx) = join(&hub, "1000").await?;

    assert_eq!(handle_text(&hub, &me, r#"{"type":"call_status"}"#), Dispatched::Skipped);
    assert_eq!(
        handle_text(&hub, &me, r#"{"type":"webrtc_ice_candidate","to":"4040"}"#),
        Dispatched::RelayFailed { to: "4040".into() }
    );
    Ok(())
}

#[tokio::test]
async fn hangup_broadcasts_call_ended() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (me, _rx) = join(&hub, "1000").await?;
    let (_peer, mut peer_rx) = join(&hub, "1001").await?;

    let out = handle_text(&hub, &me, r#"{"type":"hangup","channel":"PJSIP/1000-01"}"#);
    assert_eq!(out, Dispatched::Broadcast { kind: "call_ended".into() });
    let got = next_json(&mut peer_rx).await?;
    assert_eq!(got["type"], "call_ended");
    assert_eq!(got["from"], "1000");
    assert_eq!(got["channel"], "PJSIP/1000-01");
    assert_eq!(got["status"], "ended");

    assert_eq!(handle_text(&hub, &me, r#"{"type":"answer_call"}"#), Dispatched::Skipped);
    Ok(())
}

#[tokio::test]
async fn presence_changes_are_broadcast() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (me, _rx) = join(&hub, "1000").await?;
    let (_peer, mut peer_rx) = join(&hub, "1001").await?;

    handle_text(&hub, &me, r#"{"type":"user_status","status":"busy"}"#);
    let got = next_json(&mut peer_rx).await?;
    assert_eq!((got["type"].as_str(), got["status"].as_str()), (Some("user_status"), Some("busy")));

    handle_text(&hub, &me, r#"{"type":"user_offline"}"#);
    let got = next_json(&mut peer_rx).await?;
    assert_eq!(got["type"], "user_status_changed");
    assert_eq!(got["from"], "1000");
    assert_eq!(got["status"], "offline");
    Ok(())
}

#[yare::parameterized(
    unknown = { r#"{"type":"teleport"}"#, Dispatched::Unknown("teleport".into()) },
    untyped = { r#"{"to":"1001"}"#, Dispatched::Unknown(String::new()) },
    not_json = { "hello", Dispatched::Malformed },
    wrong_shape = { r#"{"type":42}"#, Dispatched::Malformed },
)]
fn bad_input_is_ignored(text: &str, expected: Dispatched) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime");
    rt.block_on(async {
        let hub = Hub::new(CancellationToken::new());
        let (me, _rx) = SessionHandle::new("1000", 4);
        assert_eq!(handle_text(&hub, &me, text), expected);
    });
}
