// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::manager::ManagerConfig;
use crate::transport::pump::SessionLimits;

/// Configuration for the switchboard control plane.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "switchboard", version, about = "PBX control plane and WebSocket broker")]
pub struct SwitchboardConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "SWITCHBOARD_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "SWITCHBOARD_PORT")]
    pub port: u16,

    /// PBX manager interface host.
    #[arg(long, default_value = "127.0.0.1", env = "SWITCHBOARD_PBX_HOST")]
    pub pbx_host: String,

    /// PBX manager interface port.
    #[arg(long, default_value_t = 5038, env = "SWITCHBOARD_PBX_PORT")]
    pub pbx_port: u16,

    /// Manager login username.
    #[arg(long, default_value = "admin", env = "SWITCHBOARD_PBX_USERNAME")]
    pub pbx_username: String,

    /// Manager login secret.
    #[arg(long, default_value = "", env = "SWITCHBOARD_PBX_SECRET", hide_env_values = true)]
    pub pbx_secret: String,

    /// Dialplan context used for originate and transfer.
    #[arg(long, default_value = "default", env = "SWITCHBOARD_PBX_CONTEXT")]
    pub pbx_context: String,

    /// Channel technology prefix for caller channels (e.g. `PJSIP/1000`).
    #[arg(long, default_value = "PJSIP", env = "SWITCHBOARD_PBX_CHANNEL_TECH")]
    pub pbx_channel_tech: String,

    /// TCP connect timeout in milliseconds.
    #[arg(long, default_value_t = 5000, env = "SWITCHBOARD_CONNECT_TIMEOUT_MS")]
    pub connect_timeout_ms: u64,

    /// Max wait for the command queue to accept a command, in milliseconds.
    #[arg(long, default_value_t = 10000, env = "SWITCHBOARD_COMMAND_QUEUE_TIMEOUT_MS")]
    pub command_queue_timeout_ms: u64,

    /// Max wait for a command response, in milliseconds.
    #[arg(long, default_value_t = 30000, env = "SWITCHBOARD_RESPONSE_TIMEOUT_MS")]
    pub response_timeout_ms: u64,

    /// Manager health check interval in milliseconds.
    #[arg(
        long,
        default_value_t = 30000,
        env = "SWITCHBOARD_HEALTH_CHECK_MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub health_check_ms: u64,

    /// Fixed delay between reconnection attempts in milliseconds.
    #[arg(long, default_value_t = 10000, env = "SWITCHBOARD_RECONNECT_BACKOFF_MS")]
    pub reconnect_backoff_ms: u64,

    /// Give up reconnecting after this many failed attempts. Unbounded if unset.
    #[arg(long, env = "SWITCHBOARD_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Capacity of the PBX event queue. Events beyond it are dropped.
    #[arg(long, default_value_t = 100, env = "SWITCHBOARD_EVENT_QUEUE")]
    pub event_queue: usize,

    /// Capacity of the outbound command queue.
    #[arg(long, default_value_t = 10, env = "SWITCHBOARD_COMMAND_QUEUE")]
    pub command_queue: usize,

    /// Largest inbound WebSocket message accepted from a session, in bytes.
    #[arg(long, default_value_t = 512, env = "SWITCHBOARD_WS_MAX_MESSAGE_BYTES")]
    pub ws_max_message_bytes: usize,

    /// Idle read deadline for sessions in milliseconds. Pings go out at 90% of it.
    #[arg(
        long,
        default_value_t = 60000,
        env = "SWITCHBOARD_WS_PONG_WAIT_MS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub ws_pong_wait_ms: u64,

    /// Max time allowed for a single WebSocket write, in milliseconds.
    #[arg(long, default_value_t = 10000, env = "SWITCHBOARD_WS_WRITE_WAIT_MS")]
    pub ws_write_wait_ms: u64,

    /// Per-session outbound queue capacity.
    #[arg(long, default_value_t = 256, env = "SWITCHBOARD_WS_SEND_QUEUE")]
    pub ws_send_queue: usize,

    /// Log filter directive (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info", env = "SWITCHBOARD_LOG_LEVEL")]
    pub log_level: String,

    /// Log output format: `text` or `json`.
    #[arg(long, default_value = "text", env = "SWITCHBOARD_LOG_FORMAT")]
    pub log_format: String,
}

impl SwitchboardConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            address: format!("{}:{}", self.pbx_host, self.pbx_port),
            username: self.pbx_username.clone(),
            secret: self.pbx_secret.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            queue_timeout: Duration::from_millis(self.command_queue_timeout_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
            health_interval: Duration::from_millis(self.health_check_ms),
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            event_queue: self.event_queue,
            command_queue: self.command_queue,
        }
    }

    pub fn session_limits(&self) -> SessionLimits {
        SessionLimits {
            max_message_bytes: self.ws_max_message_bytes,
            pong_wait: Duration::from_millis(self.ws_pong_wait_ms),
            write_wait: Duration::from_millis(self.ws_write_wait_ms),
            send_queue: self.ws_send_queue,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
