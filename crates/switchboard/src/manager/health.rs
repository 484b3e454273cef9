// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic liveness check for a manager connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::ManagerError;
use crate::manager::frame::Fields;
use crate::manager::ManagerClient;

/// Command used as the no-op health check.
pub const PING_ACTION: &str = "Ping";

/// Floor for the check period; `interval_at` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(10);

/// Spawn the health check for link `generation`. Stops when `cancel` fires.
/// A failed check hands the link to [`ManagerClient::connection_lost`].
pub(crate) fn spawn_health_check(
    client: Arc<ManagerClient>,
    generation: u64,
    cancel: CancellationToken,
) {
    let period = client.config().health_interval.max(MIN_PERIOD);

    tokio::spawn(async move {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            match client.send_command(PING_ACTION, Fields::new()).await {
                Ok(response) => {
                    if !response.success {
                        tracing::debug!(reason = %response.reason(), "ping answered without success");
                    }
                    client.record_health();
                }
                // Another task already tore the link down.
                Err(ManagerError::NotConnected) => break,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!(generation, err = %e, "PBX health check failed");
                    client.connection_lost(generation, &format!("health check failed: {e}"));
                    break;
                }
            }
        }
    });
}
