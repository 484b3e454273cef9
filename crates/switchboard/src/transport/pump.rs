// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read and write pumps for one browser session.
//!
//! The read pump is the only reader of the socket and the write pump the
//! only writer. Either one ending closes the session and unregisters it.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::hub::{Hub, SessionHandle};
use crate::transport::dispatch;

/// Per-session socket limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Largest inbound message accepted; anything bigger ends the session.
    pub max_message_bytes: usize,
    /// Idle read deadline, extended by every pong.
    pub pong_wait: Duration,
    /// Bound on a single socket write.
    pub write_wait: Duration,
    /// Outbound queue capacity.
    pub send_queue: usize,
}

impl SessionLimits {
    /// Keepalive period: 90% of the read deadline, never below 10ms.
    pub fn ping_period(&self) -> Duration {
        (self.pong_wait * 9 / 10).max(Duration::from_millis(10))
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_message_bytes: 512,
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            send_queue: 256,
        }
    }
}

/// Read inbound messages and dispatch them until the peer goes away, the
/// read deadline passes, or the session is closed.
pub async fn read_pump<S, E>(
    mut stream: S,
    session: Arc<SessionHandle>,
    hub: Arc<Hub>,
    limits: SessionLimits,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let deadline = tokio::time::sleep(limits.pong_wait);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = session.closed().cancelled() => break,
            () = &mut deadline => {
                tracing::debug!(session_id = %session.id, "read deadline expired");
                break;
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if text.as_str().len() > limits.max_message_bytes {
                        tracing::warn!(
                            session_id = %session.id,
                            len = text.as_str().len(),
                            "message exceeds size limit, closing session"
                        );
                        break;
                    }
                    dispatch::handle_text(&hub, &session, text.as_str());
                }
                Some(Ok(Message::Pong(_))) => {
                    deadline.as_mut().reset(Instant::now() + limits.pong_wait);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(session_id = %session.id, err = %e, "websocket read error");
                    break;
                }
            }
        }
    }

    session.close();
    hub.unregister(&session.id);
}

/// Drain the outbound queue onto the socket. Frames already queued are fed
/// as separate text messages and flushed together. Sends a ping after
/// [`SessionLimits::ping_period`] without writes.
pub async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Utf8Bytes>,
    session: Arc<SessionHandle>,
    hub: Arc<Hub>,
    limits: SessionLimits,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let period = limits.ping_period();
    let keepalive = tokio::time::sleep(period);
    tokio::pin!(keepalive);

    loop {
        tokio::select! {
            _ = session.closed().cancelled() => {
                let _ = tokio::time::timeout(limits.write_wait, sink.send(Message::Close(None))).await;
                break;
            }
            frame = rx.recv() => {
                let Some(first) = frame else { break };
                match tokio::time::timeout(limits.write_wait, write_batch(&mut sink, first, &mut rx)).await {
                    Ok(Ok(n)) => tracing::trace!(session_id = %session.id, frames = n, "flushed"),
                    Ok(Err(e)) => {
                        tracing::debug!(session_id = %session.id, err = %e, "websocket write failed");
                        break;
                    }
                    Err(_) => {
                        tracing::debug!(session_id = %session.id, "websocket write timed out");
                        break;
                    }
                }
                keepalive.as_mut().reset(Instant::now() + period);
            }
            () = &mut keepalive => {
                match tokio::time::timeout(limits.write_wait, sink.send(Message::Ping(Bytes::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        tracing::debug!(session_id = %session.id, "keepalive ping failed");
                        break;
                    }
                }
                keepalive.as_mut().reset(Instant::now() + period);
            }
        }
    }

    session.close();
    hub.unregister(&session.id);
}

async fn write_batch<S>(
    sink: &mut S,
    first: Utf8Bytes,
    rx: &mut mpsc::Receiver<Utf8Bytes>,
) -> Result<usize, S::Error>
where
    S: Sink<Message> + Unpin,
{
    sink.feed(Message::Text(first)).await?;
    let mut written = 1;
    while let Ok(next) = rx.try_recv() {
        sink.feed(Message::Text(next)).await?;
        written += 1;
    }
    sink.flush().await?;
    Ok(written)
}

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;
