// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use switchboard::config::SwitchboardConfig;

#[tokio::main]
async fn main() {
    let config = SwitchboardConfig::parse();
    switchboard::init_tracing(&config);

    if let Err(e) = switchboard::run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
