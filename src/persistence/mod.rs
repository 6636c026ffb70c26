// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistence module
//!
//! This module delivers record batches to the configured storage sinks:
//! the SQLite durable sink, the daily CSV best-effort sink, the dispatcher
//! that fans batches out with retry and backoff, and the backup queue that
//! keeps batches the durable sink rejected until they can be replayed.

use async_trait::async_trait;
use thiserror::Error;

pub mod backup;
pub mod csv;
pub mod dispatcher;
pub mod sqlite;

pub use backup::{BackupEntry, BackupQueue, ReplayOutcome};
pub use csv::CsvSink;
pub use dispatcher::PersistenceDispatcher;
pub use sqlite::SqliteSink;

use crate::acquisition::Record;

/// Errors produced by a storage sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
}

/// A storage sink accepting record batches.
///
/// Whether a sink is durable (failures retried, then queued for replay) or
/// best-effort (failures logged and dropped) is decided by how the
/// dispatcher is wired, not by the sink itself.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    /// Write every record of the batch, or fail the batch as a whole.
    async fn write_batch(&self, batch: &[Record]) -> Result<(), SinkError>;
}
