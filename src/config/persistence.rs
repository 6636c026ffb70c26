// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistence configuration
//!
//! This module defines the structures controlling the storage sinks, the
//! durable-sink retry policy, and the local backup queue used when the
//! durable sink stays unreachable.

use serde::{Deserialize, Serialize};

/// Configuration for the SQLite durable sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteSinkConfig {
    /// Flag to enable or disable the durable sink.
    ///
    /// The dispatcher requires a durable sink; disabling it is only valid
    /// when sampling is also disabled.
    pub enabled: bool,

    /// Path of the SQLite database file.
    pub path: String,

    /// Table readings are inserted into. One row per record, one nullable
    /// column per configured register.
    pub table: String,
}

impl Default for SqliteSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "powermeter.db".to_string(),
            table: "readings".to_string(),
        }
    }
}

/// Configuration for the daily CSV best-effort sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvSinkConfig {
    /// Flag to enable or disable the CSV sink.
    pub enabled: bool,

    /// Directory the daily files are written into. Created on demand.
    pub directory: String,

    /// Filename prefix; files are named `<prefix>_YYYY-MM-DD.csv`.
    pub prefix: String,
}

impl Default for CsvSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "daily_logs".to_string(),
            prefix: "meter_data".to_string(),
        }
    }
}

/// Configuration for batch delivery, retry and the backup queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Maximum delivery attempts against the durable sink before a batch is
    /// handed to the backup queue.
    pub retry_max_attempts: u32,

    /// Base backoff delay in milliseconds. The delay doubles after each
    /// failed attempt (base, 2x, 4x, ...).
    pub retry_base_delay_ms: u64,

    /// Path of the backup queue file (JSON lines, survives restarts).
    pub backup_path: String,

    /// Interval between backup replay passes, in seconds.
    pub replay_interval_seconds: u64,

    /// Upper bound on the final flush-and-deliver during shutdown, in
    /// seconds.
    pub shutdown_timeout_seconds: u64,

    /// Durable SQLite sink settings.
    #[serde(default)]
    pub sqlite: SqliteSinkConfig,

    /// Best-effort CSV sink settings.
    #[serde(default)]
    pub csv: CsvSinkConfig,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_base_delay_ms: 1000,
            backup_path: "unsaved_data.json".to_string(),
            replay_interval_seconds: 60,
            shutdown_timeout_seconds: 10,
            sqlite: SqliteSinkConfig::default(),
            csv: CsvSinkConfig::default(),
        }
    }
}
