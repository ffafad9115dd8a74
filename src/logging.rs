// ABOUTME: Tracing subscriber initialization for server and CLI binaries
// ABOUTME: Honors RUST_LOG when set, otherwise uses the configured log level
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use crate::config::LogLevel;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// RUST_LOG takes precedence over the configured level so operators can
/// raise verbosity per-module without a config change.
pub fn init(level: &LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
