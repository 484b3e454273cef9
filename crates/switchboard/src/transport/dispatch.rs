// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Routing of inbound session messages by their `type`.

use axum::extract::ws::Utf8Bytes;

use crate::hub::{Hub, SessionHandle, SignalMessage};

/// Types relayed verbatim to the extension named in `to`.
pub const RELAY_TYPES: &[&str] = &[
    "call_status",
    "webrtc_offer",
    "webrtc_answer",
    "webrtc_ice_candidate",
    "webrtc_call_accepted",
    "webrtc_call_rejected",
    "webrtc_call_ended",
];

/// What [`handle_text`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Pong,
    Relayed { to: String, delivered: usize },
    RelayFailed { to: String },
    Broadcast { kind: String },
    /// Known type, but a required field was missing.
    Skipped,
    Unknown(String),
    Malformed,
}

/// Parse and route one text message from `session`. Never fails: bad input
/// is logged and ignored.
pub fn handle_text(hub: &Hub, session: &SessionHandle, text: &str) -> Dispatched {
    let msg: SignalMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(session_id = %session.id, err = %e, "unparseable message");
            return Dispatched::Malformed;
        }
    };
    tracing::debug!(extension = %session.extension, kind = %msg.kind, "message received");
    dispatch(hub, session, msg)
}

fn dispatch(hub: &Hub, session: &SessionHandle, msg: SignalMessage) -> Dispatched {
    match msg.kind.as_str() {
        "ping" => {
            match serde_json::to_string(&SignalMessage::pong()) {
                Ok(json) => {
                    if !session.try_deliver(Utf8Bytes::from(json)) {
                        tracing::debug!(extension = %session.extension, "failed to queue pong");
                    }
                }
                Err(e) => tracing::error!(err = %e, "failed to encode pong"),
            }
            Dispatched::Pong
        }
        kind if RELAY_TYPES.contains(&kind) => {
            if msg.to.is_empty() {
                return Dispatched::Skipped;
            }
            let to = msg.to.clone();
            match hub.send_to_extension(&to, &msg) {
                Ok(delivered) => Dispatched::Relayed { to, delivered },
                Err(e) => {
                    tracing::debug!(from = %session.extension, %to, err = %e, "relay failed");
                    Dispatched::RelayFailed { to }
                }
            }
        }
        "hangup" | "answer_call" => {
            if msg.channel.is_empty() {
                return Dispatched::Skipped;
            }
            let (kind, status) =
                if msg.kind == "hangup" { ("call_ended", "ended") } else { ("call_answered", "answered") };
            let out = SignalMessage::new(kind)
                .from_ext(&session.extension)
                .channel(msg.channel)
                .status(status);
            broadcast(hub, out)
        }
        "user_status" => {
            let out =
                SignalMessage::new("user_status").from_ext(&session.extension).status(msg.status).now();
            broadcast(hub, out)
        }
        "user_online" | "user_offline" => {
            let status = if msg.kind == "user_online" { "online" } else { "offline" };
            let out = SignalMessage::new("user_status_changed")
                .from_ext(&session.extension)
                .status(status)
                .now();
            broadcast(hub, out)
        }
        other => {
            tracing::debug!(extension = %session.extension, kind = other, "unknown message type");
            Dispatched::Unknown(other.to_owned())
        }
    }
}

fn broadcast(hub: &Hub, msg: SignalMessage) -> Dispatched {
    if let Err(e) = hub.broadcast_message(&msg) {
        tracing::warn!(kind = %msg.kind, err = %e, "broadcast failed");
    }
    Dispatched::Broadcast { kind: msg.kind }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
