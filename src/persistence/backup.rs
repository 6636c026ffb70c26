// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Backup queue module
//!
//! This module keeps batches that exhausted their durable-sink retries in
//! an append-only JSON-lines file so they survive process restarts. Replay
//! walks the pending entries oldest first, re-attempts durable delivery,
//! removes delivered entries and increments the attempt count of the rest.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::RecordSink;
use crate::acquisition::Record;

/// One batch waiting for durable delivery, with its failure metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    /// The batch exactly as it was dispatched.
    pub batch: Vec<Record>,
    /// When the batch first exhausted its retries.
    pub first_failure: DateTime<Local>,
    /// Total durable delivery attempts so far, replays included.
    pub attempts: u32,
}

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOutcome {
    /// Entries delivered and removed during this pass.
    pub delivered: usize,
    /// Entries still pending after this pass.
    pub remaining: usize,
}

/// Durable on-disk queue of batches awaiting delivery.
///
/// The internal lock is held for whole operations, replay included, so an
/// append arriving mid-replay can never be lost by the rewrite.
pub struct BackupQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl BackupQueue {
    /// Create a queue backed by the given file path.
    ///
    /// The file is created lazily on the first append.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Persist a batch and its failure metadata.
    pub async fn append(&self, entry: BackupEntry) -> Result<()> {
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.exists() && !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create backup directory {:?}", parent)
                })?;
            }
        }

        let line = serde_json::to_string(&entry).context("Failed to serialize backup entry")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open backup file {:?}", self.path))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to append to backup file {:?}", self.path))?;

        info!(
            "Batch of {} records queued in backup file {:?}",
            entry.batch.len(),
            self.path
        );
        Ok(())
    }

    /// All pending entries, oldest first.
    pub async fn pending(&self) -> Result<Vec<BackupEntry>> {
        let _guard = self.lock.lock().await;
        load_entries(&self.path)
    }

    /// Number of pending entries.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.pending().await?.len())
    }

    /// Re-attempt durable delivery of every pending entry, oldest first.
    ///
    /// Each entry gets one attempt per pass; delivered entries are removed,
    /// failed ones stay with their attempt count incremented. Only the
    /// durable sink is involved, best-effort sinks are never replayed.
    pub async fn replay(&self, sink: &dyn RecordSink) -> Result<ReplayOutcome> {
        let _guard = self.lock.lock().await;

        let entries = load_entries(&self.path)?;
        if entries.is_empty() {
            return Ok(ReplayOutcome::default());
        }

        let total = entries.len();
        let mut kept = Vec::new();
        let mut outcome = ReplayOutcome::default();
        for mut entry in entries {
            entry.attempts += 1;
            match sink.write_batch(&entry.batch).await {
                Ok(()) => {
                    info!(
                        "Replayed backup batch of {} records after {} attempts",
                        entry.batch.len(),
                        entry.attempts
                    );
                    outcome.delivered += 1;
                }
                Err(err) => {
                    warn!(
                        "Backup replay still failing (attempt {}): {}",
                        entry.attempts, err
                    );
                    kept.push(entry);
                }
            }
        }

        outcome.remaining = kept.len();
        write_entries(&self.path, &kept)?;
        if outcome.delivered > 0 {
            info!(
                "Backup replay pass delivered {}/{} entries, {} remaining",
                outcome.delivered, total, outcome.remaining
            );
        }
        Ok(outcome)
    }
}

/// Load all entries, skipping lines that fail to parse.
fn load_entries(path: &Path) -> Result<Vec<BackupEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backup file {:?}", path))?;

    let mut entries = Vec::new();
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BackupEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!(
                "Skipping corrupt backup entry at {:?}:{}: {}",
                path,
                number + 1,
                err
            ),
        }
    }
    Ok(entries)
}

/// Atomically rewrite the backup file with the given entries.
fn write_entries(path: &Path, entries: &[BackupEntry]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file next to {:?}", path))?;
    for entry in entries {
        let line = serde_json::to_string(entry).context("Failed to serialize backup entry")?;
        writeln!(temp, "{}", line)?;
    }
    temp.persist(path)
        .with_context(|| format!("Failed to replace backup file {:?}", path))?;
    Ok(())
}
