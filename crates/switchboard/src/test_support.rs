// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted PBX manager server and helpers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SwitchboardConfig;
use crate::hub::Hub;
use crate::manager::frame::{read_frame, Fields, Frame};
use crate::manager::{ConnectionState, ManagerClient, ManagerConfig};
use crate::state::AppState;

/// Greeting line sent on accept.
pub const GREETING: &str = "Asterisk Call Manager/5.0.1\r\n";

/// Canned reply for an action.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `Response: Success` plus the given fields.
    Success(Fields),
    /// `Response: Error` with a `Message`.
    Error(String),
    /// Never answer.
    Silent,
}

enum ConnCmd {
    Write(Vec<u8>),
    Close,
}

#[derive(Default)]
struct Shared {
    replies: Mutex<HashMap<String, Reply>>,
    reject_login: Mutex<Option<String>>,
    received: Mutex<Vec<Frame>>,
    conns: Mutex<Vec<mpsc::UnboundedSender<ConnCmd>>>,
    accepted: AtomicUsize,
}

impl Shared {
    fn respond(&self, frame: &Frame) -> Option<Vec<u8>> {
        let action = frame.get("Action").unwrap_or_default().to_owned();
        self.received.lock().push(frame.clone());

        if action == "Login" {
            return Some(match self.reject_login.lock().as_ref() {
                Some(msg) => format!("Response: Error\r\nMessage: {msg}\r\n\r\n").into_bytes(),
                None => b"Response: Success\r\nMessage: Authentication accepted\r\n\r\n".to_vec(),
            });
        }

        let reply = self.replies.lock().get(&action).cloned();
        match reply {
            None => Some(b"Response: Success\r\n\r\n".to_vec()),
            Some(Reply::Silent) => None,
            Some(Reply::Error(msg)) => {
                Some(format!("Response: Error\r\nMessage: {msg}\r\n\r\n").into_bytes())
            }
            Some(Reply::Success(fields)) => {
                let mut out = String::from("Response: Success\r\n");
                for (k, v) in &fields {
                    out.push_str(&format!("{k}: {v}\r\n"));
                }
                out.push_str("\r\n");
                Some(out.into_bytes())
            }
        }
    }
}

/// In-process PBX manager server speaking the wire protocol.
///
/// Accepts any number of connections. Logins succeed unless
/// [`MockPbx::reject_login`] is set; other actions answer `Success` unless
/// scripted with [`MockPbx::reply`].
pub struct MockPbx {
    addr: SocketAddr,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl MockPbx {
    pub async fn start() -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared::default());
        let cancel = CancellationToken::new();

        let accept_shared = Arc::clone(&shared);
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(_) => break,
                    },
                };
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_conn(stream, Arc::clone(&accept_shared), accept_cancel.clone()));
            }
        });

        Ok(Self { addr, shared, cancel })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Manager settings pointing at this server with test-sized timings.
    pub fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::new(self.addr.to_string(), "admin", "x");
        config.connect_timeout = Duration::from_secs(1);
        config.queue_timeout = Duration::from_secs(1);
        config.response_timeout = Duration::from_secs(2);
        config.reconnect_backoff = Duration::from_millis(100);
        config
    }

    pub fn reply(&self, action: &str, reply: Reply) {
        self.shared.replies.lock().insert(action.to_owned(), reply);
    }

    /// Reject logins with `message`, or accept them again with `None`.
    pub fn reject_login(&self, message: Option<&str>) {
        *self.shared.reject_login.lock() = message.map(str::to_owned);
    }

    /// Every frame received so far, in arrival order.
    pub fn received(&self) -> Vec<Frame> {
        self.shared.received.lock().clone()
    }

    /// Actions received so far, in arrival order.
    pub fn actions(&self) -> Vec<String> {
        self.received().iter().filter_map(|f| f.get("Action").map(str::to_owned)).collect()
    }

    /// Most recent frame received for `action`.
    pub fn last(&self, action: &str) -> Option<Frame> {
        self.received().into_iter().rev().find(|f| f.get("Action") == Some(action))
    }

    pub fn connections_accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Write raw bytes to every open connection.
    pub fn push_raw(&self, bytes: &str) {
        for conn in self.shared.conns.lock().iter() {
            let _ = conn.send(ConnCmd::Write(bytes.as_bytes().to_vec()));
        }
    }

    /// Publish an event frame to every open connection.
    pub fn push_event(&self, name: &str, pairs: &[(&str, &str)]) {
        let mut out = format!("Event: {name}\r\n");
        for (k, v) in pairs {
            out.push_str(&format!("{k}: {v}\r\n"));
        }
        out.push_str("\r\n");
        self.push_raw(&out);
    }

    /// Close every open connection from the server side.
    pub fn drop_connections(&self) {
        for conn in self.shared.conns.lock().drain(..) {
            let _ = conn.send(ConnCmd::Close);
        }
    }
}

impl Drop for MockPbx {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn serve_conn(stream: tokio::net::TcpStream, shared: Arc<Shared>, cancel: CancellationToken) {
    let (read, mut write) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    shared.conns.lock().push(tx.clone());

    if write.write_all(GREETING.as_bytes()).await.is_err() {
        return;
    }

    let conn_cancel = cancel.child_token();
    let reader_cancel = conn_cancel.clone();
    let reader_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        let mut reader = BufReader::new(read);
        loop {
            let frame = tokio::select! {
                _ = reader_cancel.cancelled() => break,
                frame = read_frame(&mut reader) => frame,
            };
            let Ok(frame) = frame else { break };
            if let Some(bytes) = reader_shared.respond(&frame) {
                if tx.send(ConnCmd::Write(bytes)).is_err() {
                    break;
                }
            }
        }
    });

    loop {
        let cmd = tokio::select! {
            _ = conn_cancel.cancelled() => break,
            cmd = rx.recv() => cmd,
        };
        match cmd {
            Some(ConnCmd::Write(bytes)) => {
                if write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            Some(ConnCmd::Close) | None => break,
        }
    }
    conn_cancel.cancel();
}

/// Start a client against `pbx` and wait until it is ready.
pub async fn ready_client(
    pbx: &MockPbx,
) -> anyhow::Result<(Arc<ManagerClient>, mpsc::Receiver<crate::manager::ManagerEvent>)> {
    ready_client_with(pbx.manager_config()).await
}

pub async fn ready_client_with(
    config: ManagerConfig,
) -> anyhow::Result<(Arc<ManagerClient>, mpsc::Receiver<crate::manager::ManagerEvent>)> {
    let (client, events) = ManagerClient::new(config, CancellationToken::new());
    client.start().await?;
    wait_for_state(&client, ConnectionState::Ready, Duration::from_secs(5)).await?;
    Ok((client, events))
}

/// Wait until `client` reaches `state`.
pub async fn wait_for_state(
    client: &ManagerClient,
    state: ConnectionState,
    within: Duration,
) -> anyhow::Result<()> {
    let mut rx = client.subscribe_state();
    tokio::time::timeout(within, rx.wait_for(|s| *s == state))
        .await
        .map_err(|_| anyhow::anyhow!("timed out waiting for {state}, still {}", client.state()))??;
    Ok(())
}

/// Default config on an ephemeral port.
pub fn test_config() -> anyhow::Result<SwitchboardConfig> {
    use clap::Parser;
    let mut config = SwitchboardConfig::try_parse_from(["switchboard"])?;
    config.host = "127.0.0.1".to_owned();
    config.port = 0;
    Ok(config)
}

/// App state whose manager is never started and so stays disconnected.
pub fn test_state(config: SwitchboardConfig) -> Arc<AppState> {
    let shutdown = CancellationToken::new();
    let hub = Hub::new(shutdown.clone());
    let (manager, _events) = ManagerClient::new(config.manager_config(), shutdown.clone());
    Arc::new(AppState::new(config, hub, manager, shutdown))
}

/// Spawn the HTTP server on a random port for integration testing.
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
