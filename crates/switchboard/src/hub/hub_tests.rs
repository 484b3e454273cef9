// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Hub, SessionHandle, SignalMessage};
use crate::error::DeliveryError;

/// Poll `cond` until it holds or two seconds pass.
async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

fn decode(frame: Option<Utf8Bytes>) -> anyhow::Result<SignalMessage> {
    let frame = frame.ok_or_else(|| anyhow::anyhow!("no frame queued"))?;
    Ok(serde_json::from_str(frame.as_str())?)
}

/// Register a session and consume its welcome frame.
async fn connect(
    hub: &Hub,
    extension: &str,
    queue: usize,
) -> anyhow::Result<(Arc<SessionHandle>, mpsc::Receiver<Utf8Bytes>)> {
    let (session, mut rx) = SessionHandle::new(extension, queue);
    hub.register(Arc::clone(&session))?;
    let welcome = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
    assert_eq!(decode(welcome)?.kind, "welcome");
    Ok((session, rx))
}

#[tokio::test]
async fn register_sends_welcome() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (_session, _rx) = connect(&hub, "1001", 8).await?;
    assert!(hub.is_extension_connected("1001"));
    assert_eq!(hub.client_count(), 1);
    Ok(())
}

#[tokio::test]
async fn unicast_reaches_every_device() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (_a, mut rx_a) = connect(&hub, "1001", 8).await?;
    let (_b, mut rx_b) = connect(&hub, "1001", 8).await?;
    let (_c, mut rx_c) = connect(&hub, "1002", 8).await?;

    let sent = hub.send_to_extension("1001", &SignalMessage::new("call_status").status("ringing"))?;
    assert_eq!(sent, 2);
    assert_eq!(decode(rx_a.try_recv().ok())?.status, "ringing");
    assert_eq!(decode(rx_b.try_recv().ok())?.status, "ringing");
    assert!(rx_c.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn full_session_is_evicted_and_other_still_served() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    // Queue of one, still holding its welcome: full from the start.
    let (stuck, _stuck_rx) = SessionHandle::new("1001", 1);
    hub.register(Arc::clone(&stuck))?;
    let (_ok, mut ok_rx) = connect(&hub, "1001", 8).await?;
    assert!(wait_until(|| hub.extension_client_count("1001") == 2).await);

    let sent = hub.send_to_extension("1001", &SignalMessage::new("call_status"))?;
    assert_eq!(sent, 1);
    assert!(stuck.is_closed());
    assert!(ok_rx.try_recv().is_ok());
    assert!(wait_until(|| hub.extension_client_count("1001") == 1).await);
    Ok(())
}

#[tokio::test]
async fn unknown_extension_is_not_found() {
    let hub = Hub::new(CancellationToken::new());
    let err = hub.send_to_extension("4040", &SignalMessage::new("call_status"));
    assert!(matches!(err, Err(DeliveryError::NoSuchExtension(ext)) if ext == "4040"));
}

#[tokio::test]
async fn all_sessions_full_fails_delivery() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (session, _rx) = SessionHandle::new("1001", 1);
    hub.register(Arc::clone(&session))?;
    assert!(wait_until(|| hub.client_count() == 1).await);

    let err = hub.send_to_extension("1001", &SignalMessage::new("call_status"));
    assert!(matches!(err, Err(DeliveryError::AllClientsFailed(_))));
    assert!(wait_until(|| !hub.is_extension_connected("1001")).await);
    Ok(())
}

#[tokio::test]
async fn disconnect_callback_fires_once_for_last_session() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let counter = Arc::clone(&calls);
    hub.set_on_user_disconnect(move |ext| {
        counter.fetch_add(1, Ordering::SeqCst);
        let tx = tx.clone();
        async move {
            let _ = tx.send(ext);
            Ok::<_, anyhow::Error>(())
        }
    });

    let (a, _rx_a) = connect(&hub, "1001", 8).await?;
    let (b, _rx_b) = connect(&hub, "1001", 8).await?;

    hub.unregister(&a.id);
    assert!(wait_until(|| hub.extension_client_count("1001") == 1).await);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    hub.unregister(&b.id);
    hub.unregister(&b.id);
    let ext = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
    assert_eq!(ext.as_deref(), Some("1001"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(a.is_closed() && b.is_closed());
    Ok(())
}

#[tokio::test]
async fn eviction_of_last_session_fires_callback() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    hub.set_on_user_disconnect(move |ext| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(ext);
            Ok::<_, anyhow::Error>(())
        }
    });

    let (session, _rx) = SessionHandle::new("1001", 1);
    hub.register(session)?;
    assert!(wait_until(|| hub.client_count() == 1).await);
    let _ = hub.send_to_extension("1001", &SignalMessage::new("call_status"));

    let ext = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
    assert_eq!(ext.as_deref(), Some("1001"));
    Ok(())
}

#[tokio::test]
async fn without_callback_offline_status_is_broadcast() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (leaving, _leaving_rx) = connect(&hub, "1001", 8).await?;
    let (_watcher, mut watcher_rx) = connect(&hub, "1002", 8).await?;

    hub.unregister(&leaving.id);
    let frame = tokio::time::timeout(Duration::from_secs(2), watcher_rx.recv()).await?;
    let msg = decode(frame)?;
    assert_eq!(msg.kind, "user_status");
    assert_eq!(msg.from, "1001");
    assert_eq!(msg.status, "offline");
    Ok(())
}

#[tokio::test]
async fn broadcast_reaches_everyone_and_evicts_full() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (_a, mut rx_a) = connect(&hub, "1001", 8).await?;
    let (_b, mut rx_b) = connect(&hub, "1002", 8).await?;
    let (stuck, _stuck_rx) = SessionHandle::new("1003", 1);
    hub.register(Arc::clone(&stuck))?;
    assert!(wait_until(|| hub.client_count() == 3).await);

    hub.notify_user_status("1001", "busy")?;
    for rx in [&mut rx_a, &mut rx_b] {
        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await?;
        let msg = decode(frame)?;
        assert_eq!((msg.kind.as_str(), msg.status.as_str()), ("user_status", "busy"));
    }
    assert!(wait_until(|| hub.client_count() == 2).await);
    assert!(stuck.is_closed());
    Ok(())
}

#[tokio::test]
async fn queries_reflect_registry() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (a, _rx_a) = connect(&hub, "1002", 8).await?;
    let (_b, _rx_b) = connect(&hub, "1001", 8).await?;

    assert_eq!(hub.connected_extensions(), vec!["1001", "1002"]);
    let status = hub.extension_status("1002");
    assert!(status.ws_connected);
    assert_eq!(status.client_count, 1);
    assert_eq!(status.clients, vec![a.id.clone()]);

    let missing = hub.extension_status("1003");
    assert!(!missing.ws_connected);
    assert_eq!(missing.client_count, 0);
    Ok(())
}

#[tokio::test]
async fn incoming_call_goes_to_callee() -> anyhow::Result<()> {
    let hub = Hub::new(CancellationToken::new());
    let (_callee, mut rx) = connect(&hub, "1001", 8).await?;

    assert_eq!(hub.notify_incoming_call("1000", "1001", "PJSIP/1000-01")?, 1);
    let frame = rx.try_recv().map_err(|e| anyhow::anyhow!("{e}"))?;
    let value: serde_json::Value = serde_json::from_str(frame.as_str())?;
    assert_eq!(value["type"], "incoming_call");
    assert_eq!(value["caller"], "1000");
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_sessions() -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let hub = Hub::new(shutdown.clone());
    let (session, _rx) = connect(&hub, "1001", 8).await?;

    shutdown.cancel();
    assert!(wait_until(|| session.is_closed()).await);
    assert_eq!(hub.client_count(), 0);
    Ok(())
}
