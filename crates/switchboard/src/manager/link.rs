// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One live manager connection: handshake, the single socket reader, and
//! the single command writer.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ManagerError;
use crate::manager::frame::{
    encode_action, fields, read_frame, Fields, Frame, FrameKind, EVENT_KEY, MESSAGE_KEY, RESPONSE_KEY,
};
use crate::manager::{ManagerConfig, ManagerEvent, Response};

pub(crate) type Reader = BufReader<OwnedReadHalf>;
pub(crate) type Writer = OwnedWriteHalf;

/// Slot for the response waiter of the one in-flight command.
pub(crate) type Outstanding = Arc<Mutex<Option<oneshot::Sender<Frame>>>>;

/// A command waiting for the processor.
pub(crate) struct PendingCommand {
    pub action: String,
    pub fields: Fields,
    pub reply: oneshot::Sender<Result<Response, ManagerError>>,
}

/// Counters shared by every link of a client.
#[derive(Debug, Default)]
pub struct ManagerStats {
    pub events_dropped: AtomicU64,
    pub unattributed_responses: AtomicU64,
}

/// Open the TCP stream and discard the greeting line.
pub(crate) async fn dial(config: &ManagerConfig) -> Result<(Reader, Writer), ManagerError> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| ManagerError::Transport(format!("connect to {} timed out", config.address)))??;
    let (read, write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut greeting = String::new();
    let n = tokio::time::timeout(config.connect_timeout, reader.read_line(&mut greeting))
        .await
        .map_err(|_| ManagerError::Transport("timed out waiting for greeting".to_owned()))??;
    if n == 0 {
        return Err(ManagerError::Transport("connection closed before greeting".to_owned()));
    }
    debug!(greeting = greeting.trim(), "PBX greeting received");
    Ok((reader, write))
}

/// Authenticate on a freshly dialed connection. A rejected login poisons
/// the socket; the caller must discard it.
pub(crate) async fn login(
    reader: &mut Reader,
    writer: &mut Writer,
    config: &ManagerConfig,
) -> Result<(), ManagerError> {
    let login = encode_action(
        "Login",
        &fields([("Username", config.username.as_str()), ("Secret", config.secret.as_str())]),
    );
    writer.write_all(&login).await?;

    let reply = tokio::time::timeout(config.response_timeout, read_frame(reader))
        .await
        .map_err(|_| ManagerError::ResponseTimeout)??;
    let response = Response::from(reply);
    if !response.success {
        return Err(ManagerError::Auth(
            response.message.unwrap_or_else(|| "login rejected".to_owned()),
        ));
    }
    Ok(())
}

/// Where [`route_frame`] sent a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    Event,
    EventDropped,
    Response,
    Unattributed,
    Ignored,
}

/// Route one inbound frame. Never blocks: a full event queue drops the
/// event, and a response with no outstanding command is discarded.
pub(crate) fn route_frame(
    frame: Frame,
    outstanding: &Mutex<Option<oneshot::Sender<Frame>>>,
    events: &mpsc::Sender<ManagerEvent>,
    stats: &ManagerStats,
) -> Routed {
    match frame.kind() {
        FrameKind::Event => {
            let name = frame.get(EVENT_KEY).unwrap_or_default().to_owned();
            let event = ManagerEvent { name, fields: frame.into_fields() };
            match events.try_send(event) {
                Ok(()) => Routed::Event,
                Err(TrySendError::Full(event)) => {
                    let dropped = stats.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(event = %event.name, dropped, "event queue full, dropping event");
                    Routed::EventDropped
                }
                Err(TrySendError::Closed(event)) => {
                    stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(event = %event.name, "no event consumer, dropping event");
                    Routed::EventDropped
                }
            }
        }
        FrameKind::Response => {
            let waiter = outstanding.lock().take();
            match waiter {
                Some(tx) => {
                    if tx.send(frame).is_err() {
                        debug!("command waiter went away before its response");
                    }
                    Routed::Response
                }
                None => {
                    stats.unattributed_responses.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        response = frame.get(RESPONSE_KEY).unwrap_or_default(),
                        message = frame.get(MESSAGE_KEY).unwrap_or_default(),
                        "response with no outstanding command, dropping"
                    );
                    Routed::Unattributed
                }
            }
        }
        FrameKind::Other => {
            debug!(fields = frame.len(), "ignoring unclassified frame");
            Routed::Ignored
        }
    }
}

/// Sole reader of the socket. Returns the error that ended the link, or
/// `None` when cancelled.
pub(crate) async fn read_loop(
    mut reader: Reader,
    outstanding: Outstanding,
    events: mpsc::Sender<ManagerEvent>,
    stats: Arc<ManagerStats>,
    cancel: CancellationToken,
) -> Option<io::Error> {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return None,
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(frame) => {
                route_frame(frame, &outstanding, &events, &stats);
            }
            Err(e) => return Some(e),
        }
    }
}

/// Sole writer of the socket. Sends one command, then waits for its
/// response or the timeout before taking the next.
///
/// The response wait is not interrupted when the link is cancelled: a caller
/// whose command was in flight when the connection dropped observes its own
/// response timeout. Only process shutdown cuts it short.
pub(crate) async fn command_loop(
    mut writer: Writer,
    mut commands: mpsc::Receiver<PendingCommand>,
    outstanding: Outstanding,
    response_timeout: Duration,
    cancel: CancellationToken,
    shutdown: CancellationToken,
) -> Option<io::Error> {
    loop {
        let cmd = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            cmd = commands.recv() => match cmd {
                Some(cmd) => cmd,
                None => return None,
            },
        };
        // Never write to a link that was lost while this command sat queued.
        if cancel.is_cancelled() {
            let _ = cmd.reply.send(Err(ManagerError::NotConnected));
            return None;
        }
        if cmd.reply.is_closed() {
            debug!(action = %cmd.action, "caller gave up before dispatch, skipping command");
            continue;
        }

        let (tx, rx) = oneshot::channel();
        *outstanding.lock() = Some(tx);

        debug!(action = %cmd.action, fields = cmd.fields.len(), "sending command");
        let bytes = encode_action(&cmd.action, &cmd.fields);
        let written = match tokio::time::timeout(response_timeout, writer.write_all(&bytes)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "command write timed out")),
        };
        if let Err(e) = written {
            outstanding.lock().take();
            let _ = cmd.reply.send(Err(ManagerError::Transport(e.to_string())));
            return Some(e);
        }

        let result = tokio::select! {
            _ = shutdown.cancelled() => Err(ManagerError::NotConnected),
            reply = tokio::time::timeout(response_timeout, rx) => match reply {
                Ok(Ok(frame)) => Ok(Response::from(frame)),
                Ok(Err(_)) => Err(ManagerError::Transport("response slot was cleared".to_owned())),
                Err(_) => {
                    outstanding.lock().take();
                    warn!(action = %cmd.action, "no response within {response_timeout:?}");
                    Err(ManagerError::ResponseTimeout)
                }
            },
        };
        let _ = cmd.reply.send(result);
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
