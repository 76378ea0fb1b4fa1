// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default level.
/// With `json` every line is a JSON object.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    let builder = fmt().with_env_filter(env_filter()).with_target(false);
    if json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
    }
}

/// Routes logs through the test harness. Safe to call from every test.
pub fn init_for_testing() {
    let _ = fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}
