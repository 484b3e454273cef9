// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::calls::CallControl;
use crate::config::SwitchboardConfig;
use crate::hub::Hub;
use crate::manager::ManagerClient;
use crate::transport::pump::SessionLimits;

/// Shared state handed to every request handler.
pub struct AppState {
    pub config: SwitchboardConfig,
    pub limits: SessionLimits,
    pub hub: Arc<Hub>,
    pub manager: Arc<ManagerClient>,
    pub calls: CallControl,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: SwitchboardConfig,
        hub: Arc<Hub>,
        manager: Arc<ManagerClient>,
        shutdown: CancellationToken,
    ) -> Self {
        let calls = CallControl::new(
            Arc::clone(&manager),
            config.pbx_context.clone(),
            config.pbx_channel_tech.clone(),
        );
        Self { limits: config.session_limits(), config, hub, manager, calls, shutdown }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
