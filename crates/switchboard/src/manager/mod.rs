// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PBX manager protocol client.
//!
//! One TCP connection carries both command responses and unsolicited
//! events. Exactly one task reads the socket and routes each frame; exactly
//! one task writes commands, one at a time, because responses carry no
//! correlation id and are attributed purely by ordering.

pub mod client;
pub mod frame;
pub mod health;
pub(crate) mod link;

use std::fmt;
use std::time::Duration;

pub use client::ManagerClient;
pub use frame::{Fields, Frame, FrameKind};
pub use link::ManagerStats;

use frame::{MESSAGE_KEY, RESPONSE_KEY};

/// Connection settings for [`ManagerClient`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// `host:port` of the manager interface.
    pub address: String,
    pub username: String,
    pub secret: String,
    pub connect_timeout: Duration,
    pub queue_timeout: Duration,
    pub response_timeout: Duration,
    pub health_interval: Duration,
    pub reconnect_backoff: Duration,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub event_queue: usize,
    pub command_queue: usize,
}

impl ManagerConfig {
    /// Defaults for a manager interface at `address` with the given credentials.
    pub fn new(address: impl Into<String>, username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            secret: secret.into(),
            connect_timeout: Duration::from_secs(5),
            queue_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            reconnect_backoff: Duration::from_secs(10),
            max_reconnect_attempts: None,
            event_queue: 100,
            command_queue: 10,
        }
    }
}

/// Lifecycle of the manager connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    LoggingIn,
    Ready,
    /// The link failed and a replacement is being negotiated.
    Degraded,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::LoggingIn => "logging_in",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one manager command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// `true` iff the `Response` field equals `Success`.
    pub success: bool,
    /// The `Message` field, when present.
    pub message: Option<String>,
    pub fields: Fields,
}

impl Response {
    /// Best available reason text for a failed response.
    pub fn reason(&self) -> String {
        match &self.message {
            Some(m) => m.clone(),
            None => self.fields.get(RESPONSE_KEY).cloned().unwrap_or_else(|| "no response".to_owned()),
        }
    }
}

impl From<Frame> for Response {
    fn from(frame: Frame) -> Self {
        let success = frame.get(RESPONSE_KEY) == Some("Success");
        let message = frame.get(MESSAGE_KEY).map(str::to_owned);
        Self { success, message, fields: frame.into_fields() }
    }
}

/// An unsolicited event published by the PBX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerEvent {
    /// Value of the `Event` field.
    pub name: String,
    pub fields: Fields,
}

impl ManagerEvent {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}
