// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Call-control operations over the manager client.
//!
//! Each operation maps to one PBX action. None of them ever triggers a
//! reconnect: when the client is not ready they fail fast with
//! [`CallError::NotConnected`] before touching the network.

use std::sync::Arc;

use serde::Serialize;

use crate::error::{CallError, CallOp};
use crate::manager::frame::{fields, Fields};
use crate::manager::{ManagerClient, Response};

/// Ring timeout passed to `Originate`, in milliseconds.
pub const ORIGINATE_TIMEOUT_MS: &str = "30000";

/// Registration state of a SIP endpoint as seen by the PBX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    Registered,
    ConfiguredNotRegistered,
    NotConfigured,
}

impl EndpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::ConfiguredNotRegistered => "configured_not_registered",
            Self::NotConfigured => "not_configured",
        }
    }
}

/// Call-control facade. Cheap to clone.
#[derive(Clone)]
pub struct CallControl {
    manager: Arc<ManagerClient>,
    context: String,
    channel_tech: String,
}

impl CallControl {
    pub fn new(
        manager: Arc<ManagerClient>,
        context: impl Into<String>,
        channel_tech: impl Into<String>,
    ) -> Self {
        Self { manager, context: context.into(), channel_tech: channel_tech.into() }
    }

    /// Ring `from` and connect it to `to`. Returns the caller channel name.
    pub async fn originate(&self, from: &str, to: &str) -> Result<String, CallError> {
        let channel = format!("{}/{from}", self.channel_tech);
        let call_id = format!("call-{}", uuid::Uuid::new_v4());
        let variable = format!("CALL_ID={call_id}");
        tracing::info!(from, to, %call_id, "originating call");

        self.expect_success(
            CallOp::Originate,
            "Originate",
            fields([
                ("Channel", channel.as_str()),
                ("Context", self.context.as_str()),
                ("Exten", to),
                ("Priority", "1"),
                ("CallerID", from),
                ("Timeout", ORIGINATE_TIMEOUT_MS),
                ("Variable", variable.as_str()),
                ("Async", "true"),
            ]),
        )
        .await?;
        Ok(channel)
    }

    pub async fn hangup(&self, channel: &str) -> Result<(), CallError> {
        self.expect_success(CallOp::Hangup, "Hangup", fields([("Channel", channel)])).await?;
        tracing::info!(channel, "call hung up");
        Ok(())
    }

    pub async fn answer(&self, channel: &str) -> Result<(), CallError> {
        self.expect_success(CallOp::Answer, "Answer", fields([("Channel", channel)])).await?;
        tracing::info!(channel, "call answered");
        Ok(())
    }

    /// Redirect `channel` to `extension` in the configured context.
    pub async fn transfer(&self, channel: &str, extension: &str) -> Result<(), CallError> {
        self.expect_success(
            CallOp::Transfer,
            "Redirect",
            fields([
                ("Channel", channel),
                ("Exten", extension),
                ("Context", self.context.as_str()),
                ("Priority", "1"),
            ]),
        )
        .await?;
        tracing::info!(channel, extension, "call transferred");
        Ok(())
    }

    pub async fn hold(&self, channel: &str) -> Result<(), CallError> {
        self.expect_success(
            CallOp::Hold,
            "MusicOnHold",
            fields([("Channel", channel), ("Class", "hold")]),
        )
        .await?;
        tracing::info!(channel, "call on hold");
        Ok(())
    }

    pub async fn unhold(&self, channel: &str) -> Result<(), CallError> {
        self.expect_success(CallOp::Unhold, "StopMusicOnHold", fields([("Channel", channel)]))
            .await?;
        tracing::info!(channel, "call off hold");
        Ok(())
    }

    /// Fields the PBX reports for `channel`.
    pub async fn status(&self, channel: &str) -> Result<Fields, CallError> {
        let response =
            self.expect_success(CallOp::Status, "Status", fields([("Channel", channel)])).await?;
        Ok(response.fields)
    }

    /// Active channels. The manager answers the listing with a single
    /// response frame, so at most one entry is returned.
    pub async fn list_channels(&self) -> Result<Vec<Fields>, CallError> {
        let response = self.execute(CallOp::ListChannels, "CoreShowChannels", Fields::new()).await?;
        if response.success {
            Ok(vec![response.fields])
        } else {
            Ok(Vec::new())
        }
    }

    /// Whether `extension` is configured on the PBX and has a registered contact.
    pub async fn endpoint_status(&self, extension: &str) -> Result<EndpointStatus, CallError> {
        let endpoint = self
            .execute(CallOp::EndpointStatus, "PJSIPShowEndpoint", fields([("Endpoint", extension)]))
            .await?;
        if !endpoint.success {
            return Ok(EndpointStatus::NotConfigured);
        }

        let contact = format!("{extension}/sip:{extension}@");
        match self
            .execute(CallOp::EndpointStatus, "PJSIPShowContacts", fields([("Contact", contact)]))
            .await
        {
            Ok(response) if response.success => Ok(EndpointStatus::Registered),
            Ok(_) => Ok(EndpointStatus::ConfiguredNotRegistered),
            Err(CallError::NotConnected) => Err(CallError::NotConnected),
            Err(e) => {
                tracing::debug!(extension, err = %e, "contact lookup failed");
                Ok(EndpointStatus::ConfiguredNotRegistered)
            }
        }
    }

    async fn execute(&self, op: CallOp, action: &str, fields: Fields) -> Result<Response, CallError> {
        if !self.manager.is_ready() {
            tracing::warn!(%op, "PBX not ready");
            return Err(CallError::NotConnected);
        }
        self.manager.send_command(action, fields).await.map_err(|e| CallError::from_manager(op, e))
    }

    async fn expect_success(
        &self,
        op: CallOp,
        action: &str,
        fields: Fields,
    ) -> Result<Response, CallError> {
        let response = self.execute(op, action, fields).await?;
        if !response.success {
            let reason = response.reason();
            tracing::warn!(%op, %reason, "PBX rejected command");
            return Err(CallError::Failed { op, reason });
        }
        Ok(response)
    }
}

#[cfg(test)]
#[path = "calls_tests.rs"]
mod tests;
