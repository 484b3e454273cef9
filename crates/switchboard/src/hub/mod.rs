// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry and fan-out for browser sessions.
//!
//! A single owner task applies register, unregister and broadcast in arrival
//! order and is the only writer of the [`Registry`]. Read-style queries and
//! unicast take the read lock directly.

pub mod message;
pub mod registry;

use std::future::Future;
use std::sync::{Arc, Weak};

use axum::extract::ws::Utf8Bytes;
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::DeliveryError;

pub use message::{CallMessage, SignalMessage};
pub use registry::{Registry, SessionHandle};

/// Hook invoked when an extension's last session goes away.
pub type DisconnectCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

enum HubCommand {
    Register(Arc<SessionHandle>),
    Unregister(String),
    Broadcast(Utf8Bytes),
}

/// Per-extension connection summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStatus {
    pub extension: String,
    pub ws_connected: bool,
    pub client_count: usize,
    pub clients: Vec<String>,
}

pub struct Hub {
    registry: RwLock<Registry>,
    commands: mpsc::UnboundedSender<HubCommand>,
    on_disconnect: RwLock<Option<DisconnectCallback>>,
}

impl Hub {
    /// Create the hub and spawn its owner task. The task exits on `shutdown`,
    /// closing every session, or once the hub is dropped.
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        let (commands, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            registry: RwLock::new(Registry::new()),
            commands,
            on_disconnect: RwLock::new(None),
        });
        tokio::spawn(run_owner(Arc::downgrade(&hub), rx, shutdown));
        hub
    }

    /// Install the hook called when an extension's last session drops.
    pub fn set_on_user_disconnect<F, Fut>(&self, callback: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: DisconnectCallback =
            Arc::new(move |ext: String| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(callback(ext))
            });
        *self.on_disconnect.write() = Some(callback);
    }

    pub fn register(&self, session: Arc<SessionHandle>) -> Result<(), DeliveryError> {
        self.commands.send(HubCommand::Register(session)).map_err(|_| DeliveryError::HubClosed)
    }

    pub fn unregister(&self, session_id: &str) {
        let _ = self.commands.send(HubCommand::Unregister(session_id.to_owned()));
    }

    /// Deliver `message` to every session of `extension`. Sessions whose queue
    /// is full are evicted. Returns how many sessions accepted the message.
    pub fn send_to_extension<T: Serialize + ?Sized>(
        &self,
        extension: &str,
        message: &T,
    ) -> Result<usize, DeliveryError> {
        let targets = self.registry.read().sessions_for(extension).to_vec();
        if targets.is_empty() {
            tracing::debug!(extension, "no client found for extension");
            return Err(DeliveryError::NoSuchExtension(extension.to_owned()));
        }
        let payload = Utf8Bytes::from(serde_json::to_string(message)?);

        let mut delivered = 0;
        for session in &targets {
            if session.try_deliver(payload.clone()) {
                delivered += 1;
            } else {
                tracing::warn!(extension, session_id = %session.id, "send queue full, evicting session");
                self.evict(session);
            }
        }
        if delivered == 0 {
            return Err(DeliveryError::AllClientsFailed(extension.to_owned()));
        }
        tracing::debug!(extension, delivered, "message sent");
        Ok(delivered)
    }

    /// Queue `message` for every connected session.
    pub fn broadcast_message<T: Serialize + ?Sized>(&self, message: &T) -> Result<(), DeliveryError> {
        let payload = Utf8Bytes::from(serde_json::to_string(message)?);
        self.commands.send(HubCommand::Broadcast(payload)).map_err(|_| DeliveryError::HubClosed)
    }

    /// Connected extensions, sorted.
    pub fn connected_extensions(&self) -> Vec<String> {
        self.registry.read().extensions()
    }

    pub fn is_extension_connected(&self, extension: &str) -> bool {
        self.registry.read().is_connected(extension)
    }

    pub fn extension_client_count(&self, extension: &str) -> usize {
        self.registry.read().count_for(extension)
    }

    pub fn client_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn extension_status(&self, extension: &str) -> ExtensionStatus {
        let registry = self.registry.read();
        let clients: Vec<String> =
            registry.sessions_for(extension).iter().map(|s| s.id.clone()).collect();
        ExtensionStatus {
            extension: extension.to_owned(),
            ws_connected: !clients.is_empty(),
            client_count: clients.len(),
            clients,
        }
    }

    /// Ring `callee` for a call from `caller`.
    pub fn notify_incoming_call(
        &self,
        caller: &str,
        callee: &str,
        channel: &str,
    ) -> Result<usize, DeliveryError> {
        self.send_to_extension(callee, &CallMessage::incoming(caller, callee, channel))
    }

    /// Tell both parties about a call state change. Delivery failures are logged.
    pub fn notify_call_status(&self, caller: &str, callee: &str, status: &str, channel: &str) {
        let msg = CallMessage::status(caller, callee, status, channel);
        for extension in [caller, callee] {
            if let Err(e) = self.send_to_extension(extension, &msg) {
                tracing::debug!(extension, err = %e, "call status not delivered");
            }
        }
    }

    pub fn notify_user_status(&self, extension: &str, status: &str) -> Result<(), DeliveryError> {
        self.broadcast_message(&SignalMessage::new("user_status").from_ext(extension).status(status))
    }

    fn evict(&self, session: &SessionHandle) {
        session.close();
        self.unregister(&session.id);
    }

    // -- Owner-side handlers ------------------------------------------------

    fn apply_register(&self, session: Arc<SessionHandle>) {
        let count = {
            let mut registry = self.registry.write();
            if !registry.insert(Arc::clone(&session)) {
                tracing::warn!(session_id = %session.id, "duplicate session id, ignoring");
                return;
            }
            registry.count_for(&session.extension)
        };
        tracing::info!(
            session_id = %session.id,
            extension = %session.extension,
            clients = count,
            "client registered"
        );

        let welcome = match serde_json::to_string(&SignalMessage::welcome()) {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                tracing::error!(err = %e, "failed to encode welcome");
                return;
            }
        };
        if !session.try_deliver(welcome) {
            tracing::warn!(session_id = %session.id, "welcome not accepted, dropping session");
            session.close();
            self.apply_unregister(&session.id);
        }
    }

    fn apply_unregister(&self, session_id: &str) {
        let Some(removed) = self.registry.write().remove(session_id) else {
            return;
        };
        let session = removed.session;
        session.close();
        tracing::info!(
            session_id = %session.id,
            extension = %session.extension,
            remaining = self.extension_client_count(&session.extension),
            "client unregistered"
        );
        if removed.last_for_extension {
            self.extension_offline(session.extension.clone());
        }
    }

    fn apply_broadcast(&self, payload: Utf8Bytes) {
        let targets: Vec<_> = self.registry.read().all().cloned().collect();
        for session in targets {
            if !session.try_deliver(payload.clone()) {
                tracing::warn!(session_id = %session.id, "send queue full on broadcast, evicting session");
                session.close();
                self.apply_unregister(&session.id);
            }
        }
    }

    fn extension_offline(&self, extension: String) {
        let callback = self.on_disconnect.read().clone();
        match callback {
            Some(callback) => {
                tokio::spawn(async move {
                    tracing::info!(%extension, "last session closed, marking user offline");
                    if let Err(e) = callback(extension.clone()).await {
                        tracing::warn!(%extension, err = %e, "disconnect callback failed");
                    }
                });
            }
            None => {
                let msg = SignalMessage::new("user_status").from_ext(&extension).status("offline");
                match serde_json::to_string(&msg) {
                    Ok(json) => self.apply_broadcast(Utf8Bytes::from(json)),
                    Err(e) => tracing::error!(err = %e, "failed to encode offline status"),
                }
            }
        }
    }
}

async fn run_owner(
    hub: Weak<Hub>,
    mut rx: mpsc::UnboundedReceiver<HubCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let cmd = tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };
        let Some(hub) = hub.upgrade() else {
            break;
        };
        match cmd {
            HubCommand::Register(session) => hub.apply_register(session),
            HubCommand::Unregister(id) => hub.apply_unregister(&id),
            HubCommand::Broadcast(payload) => hub.apply_broadcast(payload),
        }
    }

    if let Some(hub) = hub.upgrade() {
        let sessions = hub.registry.write().drain();
        for session in &sessions {
            session.close();
        }
        tracing::debug!(closed = sessions.len(), "hub stopped");
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
