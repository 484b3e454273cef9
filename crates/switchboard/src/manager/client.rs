// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::ManagerError;
use crate::manager::frame::Fields;
use crate::manager::link::{self, Outstanding, PendingCommand, Reader, Writer};
use crate::manager::{health, ConnectionState, ManagerConfig, ManagerEvent, ManagerStats, Response};

/// Handles to the tasks serving one established connection. Replaced, never
/// mutated, on reconnect.
struct Link {
    generation: u64,
    commands: mpsc::Sender<PendingCommand>,
    cancel: CancellationToken,
}

/// Persistent client for the PBX manager interface.
///
/// Owns at most one live connection. Commands are serialized through a
/// bounded queue and fail fast with [`ManagerError::NotConnected`] whenever
/// the client is not [`ConnectionState::Ready`].
pub struct ManagerClient {
    config: ManagerConfig,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    reconnecting: AtomicBool,
    /// Epoch millis of the last successful health check; 0 if none yet.
    last_health_ms: AtomicU64,
    events: mpsc::Sender<ManagerEvent>,
    stats: Arc<ManagerStats>,
    shutdown: CancellationToken,
}

impl ManagerClient {
    /// Create a disconnected client. The receiver yields PBX events; it is
    /// bounded and events are dropped while it is full.
    pub fn new(
        config: ManagerConfig,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<ManagerEvent>) {
        let (events, events_rx) = mpsc::channel(config.event_queue.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let client = Arc::new(Self {
            config,
            state,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            reconnecting: AtomicBool::new(false),
            last_health_ms: AtomicU64::new(0),
            events,
            stats: Arc::new(ManagerStats::default()),
            shutdown: shutdown.child_token(),
        });
        (client, events_rx)
    }

    /// Connect and log in. On failure the client keeps retrying in the
    /// background and the error is returned for the caller to report.
    pub async fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        match self.establish().await {
            Ok((reader, writer)) => {
                self.install(reader, writer);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(address = %self.config.address, err = %e, "PBX connection failed");
                self.set_state(ConnectionState::Disconnected);
                self.spawn_reconnect();
                Err(e)
            }
        }
    }

    /// Send one command and wait for its response.
    ///
    /// Waits at most `queue_timeout` for the command queue to accept the
    /// command, then at most `response_timeout` for the reply.
    pub async fn send_command(&self, action: &str, fields: Fields) -> Result<Response, ManagerError> {
        if !self.is_ready() {
            return Err(ManagerError::NotConnected);
        }
        let commands = match self.link.lock().as_ref() {
            Some(link) => link.commands.clone(),
            None => return Err(ManagerError::NotConnected),
        };

        let (reply, rx) = oneshot::channel();
        let cmd = PendingCommand { action: action.to_owned(), fields, reply };
        match tokio::time::timeout(self.config.queue_timeout, commands.send(cmd)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ManagerError::NotConnected),
            Err(_) => {
                tracing::warn!(action, "command queue full for {:?}", self.config.queue_timeout);
                return Err(ManagerError::QueueTimeout);
            }
        }

        // The processor bounds the wait; a dropped reply means the link went away
        // before the command was dispatched.
        rx.await.unwrap_or(Err(ManagerError::NotConnected))
    }

    pub fn is_ready(&self) -> bool {
        *self.state.borrow() == ConnectionState::Ready
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Epoch millis of the last successful health check.
    pub fn last_health_check(&self) -> Option<u64> {
        match self.last_health_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn stats(&self) -> &ManagerStats {
        &self.stats
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Tear down the live connection and stop reconnecting.
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Some(link) = self.link.lock().take() {
            link.cancel.cancel();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    pub(crate) fn record_health(&self) {
        self.last_health_ms.store(crate::state::epoch_ms(), Ordering::Relaxed);
    }

    /// Mark link `generation` dead and schedule a replacement. Stale
    /// generations are ignored so one failure triggers one reconnect.
    pub(crate) fn connection_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        let lost = {
            let mut link = self.link.lock();
            match link.as_ref() {
                Some(l) if l.generation == generation => link.take(),
                _ => None,
            }
        };
        let Some(lost) = lost else {
            return;
        };
        lost.cancel.cancel();

        if self.shutdown.is_cancelled() {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        tracing::warn!(generation, reason, "PBX connection lost");
        self.set_state(ConnectionState::Degraded);
        self.spawn_reconnect();
    }

    async fn establish(&self) -> Result<(Reader, Writer), ManagerError> {
        self.set_state(ConnectionState::Connecting);
        let (mut reader, mut writer) = link::dial(&self.config).await?;
        self.set_state(ConnectionState::LoggingIn);
        link::login(&mut reader, &mut writer, &self.config).await?;
        Ok((reader, writer))
    }

    /// Start the reader, command processor, and health check for a freshly
    /// logged-in connection, then go Ready.
    fn install(self: &Arc<Self>, reader: Reader, writer: Writer) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = self.shutdown.child_token();
        let (commands, commands_rx) = mpsc::channel(self.config.command_queue.max(1));
        let outstanding: Outstanding = Arc::default();

        let previous =
            self.link.lock().replace(Link { generation, commands, cancel: cancel.clone() });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        self.set_state(ConnectionState::Ready);
        tracing::info!(address = %self.config.address, generation, "PBX connection ready");

        let client = Arc::clone(self);
        let read_cancel = cancel.clone();
        let read_outstanding = Arc::clone(&outstanding);
        tokio::spawn(async move {
            let events = client.events.clone();
            let stats = Arc::clone(&client.stats);
            if let Some(e) =
                link::read_loop(reader, read_outstanding, events, stats, read_cancel).await
            {
                client.connection_lost(generation, &format!("read failed: {e}"));
            }
        });

        let client = Arc::clone(self);
        let response_timeout = self.config.response_timeout;
        let shutdown = self.shutdown.clone();
        let command_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Some(e) = link::command_loop(
                writer,
                commands_rx,
                outstanding,
                response_timeout,
                command_cancel,
                shutdown,
            )
            .await
            {
                client.connection_lost(generation, &format!("write failed: {e}"));
            }
        });

        health::spawn_health_check(Arc::clone(self), generation, cancel);
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        let client = Arc::clone(self);
        tokio::spawn(async move { client.reconnect_loop().await });
    }

    async fn reconnect_loop(self: Arc<Self>) {
        let backoff = self.config.reconnect_backoff;
        let mut attempts = 0u32;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            attempts += 1;
            tracing::info!(attempt = attempts, "reconnecting to PBX");

            match self.establish().await {
                Ok((reader, writer)) => {
                    // Clear before install so a failure of the new link can
                    // schedule its own reconnect.
                    self.reconnecting.store(false, Ordering::Release);
                    if self.shutdown.is_cancelled() {
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    self.install(reader, writer);
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempts, err = %e, ?backoff, "PBX reconnect failed");
                    self.set_state(ConnectionState::Disconnected);
                    if let Some(max) = self.config.max_reconnect_attempts {
                        if attempts >= max {
                            tracing::error!(attempts, "giving up on PBX reconnection");
                            break;
                        }
                    }
                }
            }
        }
        self.reconnecting.store(false, Ordering::Release);
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::info!(from = %prev, to = %next, "PBX connection state");
        }
    }
}
