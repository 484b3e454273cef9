// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON messages exchanged with browser sessions.

use serde::{Deserialize, Serialize};

/// General-purpose session message, discriminated by `type`.
///
/// Used both for inbound browser messages and for frames the hub pushes.
/// Empty string fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Unix seconds. Zero when the sender did not stamp the message.
    #[serde(default)]
    pub timestamp: i64,
}

impl SignalMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), ..Default::default() }
    }

    pub fn from_ext(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    /// Stamp with the current time.
    pub fn now(mut self) -> Self {
        self.timestamp = epoch_secs();
        self
    }

    /// First frame every session receives.
    pub fn welcome() -> Self {
        Self::new("welcome").status("connected").now()
    }

    pub fn pong() -> Self {
        Self::new("pong").now()
    }
}

/// Call notification pushed to the parties of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub caller: String,
    pub callee: String,
    pub channel: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub transport: String,
}

impl CallMessage {
    pub fn incoming(caller: &str, callee: &str, channel: &str) -> Self {
        Self {
            kind: "incoming_call".to_owned(),
            caller: caller.to_owned(),
            callee: callee.to_owned(),
            channel: channel.to_owned(),
            status: "ringing".to_owned(),
            priority: "normal".to_owned(),
            transport: "transport-ws".to_owned(),
        }
    }

    pub fn status(caller: &str, callee: &str, status: &str, channel: &str) -> Self {
        Self {
            kind: "call_status".to_owned(),
            caller: caller.to_owned(),
            callee: callee.to_owned(),
            channel: channel.to_owned(),
            status: status.to_owned(),
            priority: String::new(),
            transport: String::new(),
        }
    }
}

fn epoch_secs() -> i64 {
    (crate::state::epoch_ms() / 1000) as i64
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
