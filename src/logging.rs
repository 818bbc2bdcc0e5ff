// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Tracing subscriber setup driven by `LOG_LEVEL`

use crate::errors::ConfigError;
use tracing::Level;

/// Maps a `LOG_LEVEL` value to a tracing level.
///
/// Accepts the tracing names plus the `WARNING` and `CRITICAL` spellings
/// commonly used by serverless hosts. Matching is case-insensitive.
pub fn parse_log_level(value: &str) -> Result<Level, ConfigError> {
    match value.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok(Level::TRACE),
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARN" | "WARNING" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" | "FATAL" => Ok(Level::ERROR),
        _ => Err(ConfigError::InvalidLogLevel(value.to_string())),
    }
}

/// Installs the global fmt subscriber at `level`
pub fn init_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}
