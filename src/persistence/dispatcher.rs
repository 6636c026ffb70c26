// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persistence dispatcher module
//!
//! This module fans a batch out to the configured sinks. Best-effort sinks
//! are tried once each; the durable sink is retried with exponential
//! backoff, and a batch that exhausts its retries is handed to the backup
//! queue instead of being dropped.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use log::{error, info, warn};

use super::backup::{BackupEntry, BackupQueue, ReplayOutcome};
use super::RecordSink;
use crate::acquisition::Record;
use crate::config::PersistenceConfig;

/// Delivers batches to every configured sink.
///
/// A batch handed to `deliver` is either written to the durable sink or
/// appended to the backup queue; it is never silently lost. Best-effort
/// sink failures are logged and do not affect the durable path.
pub struct PersistenceDispatcher {
    durable: Arc<dyn RecordSink>,
    best_effort: Vec<Arc<dyn RecordSink>>,
    backup: Arc<BackupQueue>,
    max_attempts: u32,
    base_delay: Duration,
}

impl PersistenceDispatcher {
    /// Create a dispatcher for the given sinks and retry policy.
    pub fn new(
        config: &PersistenceConfig,
        durable: Arc<dyn RecordSink>,
        best_effort: Vec<Arc<dyn RecordSink>>,
        backup: Arc<BackupQueue>,
    ) -> Self {
        Self {
            durable,
            best_effort,
            backup,
            max_attempts: config.retry_max_attempts,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }

    /// Deliver one batch to all sinks.
    ///
    /// Completes when the batch reached the durable sink or the backup
    /// queue; the number of awaits is bounded by the retry cap.
    pub async fn deliver(&self, batch: Vec<Record>) {
        if batch.is_empty() {
            return;
        }

        for sink in &self.best_effort {
            if let Err(err) = sink.write_batch(&batch).await {
                warn!("{} sink write failed: {}", sink.name(), err);
            }
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.durable.write_batch(&batch).await {
                Ok(()) => {
                    info!(
                        "Batch delivered to {} sink ({} records)",
                        self.durable.name(),
                        batch.len()
                    );
                    return;
                }
                Err(err) => {
                    if attempts >= self.max_attempts {
                        error!(
                            "{} sink write failed after {} attempts: {}; queueing batch for replay",
                            self.durable.name(),
                            attempts,
                            err
                        );
                        let entry = BackupEntry {
                            batch,
                            first_failure: Local::now(),
                            attempts,
                        };
                        if let Err(err) = self.backup.append(entry).await {
                            error!("Failed to append batch to backup queue: {}", err);
                        }
                        return;
                    }
                    warn!(
                        "{} sink write failed (attempt {}/{}): {}",
                        self.durable.name(),
                        attempts,
                        self.max_attempts,
                        err
                    );
                }
            }

            // Exponential backoff (base, 2x, 4x, ...)
            let backoff = self.base_delay * 2_u32.pow(attempts - 1);
            tokio::time::sleep(backoff).await;
        }
    }

    /// Run one replay pass over the backup queue, durable sink only.
    pub async fn replay_backlog(&self) -> Result<ReplayOutcome> {
        self.backup.replay(self.durable.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::SinkError;
    use async_trait::async_trait;
    use chrono::Local;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::time::Instant;

    fn test_config(max_attempts: u32, base_delay_ms: u64, backup: &std::path::Path) -> PersistenceConfig {
        PersistenceConfig {
            retry_max_attempts: max_attempts,
            retry_base_delay_ms: base_delay_ms,
            backup_path: backup.to_string_lossy().into_owned(),
            ..PersistenceConfig::default()
        }
    }

    fn batch(len: usize) -> Vec<Record> {
        (0..len)
            .map(|i| {
                let mut fields = BTreeMap::new();
                fields.insert("voltage_l1".to_string(), Some(230.0 + i as f64));
                Record {
                    timestamp: Local::now(),
                    fields,
                }
            })
            .collect()
    }

    /// Sink that fails its first `failures` calls, then succeeds, recording
    /// every delivered batch.
    struct ScriptedSink {
        failures: u32,
        calls: AtomicU32,
        delivered: StdMutex<Vec<usize>>,
    }

    impl ScriptedSink {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                delivered: StdMutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RecordSink for ScriptedSink {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn write_batch(&self, batch: &[Record]) -> Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(SinkError::Io(std::io::Error::other("connection refused")))
            } else {
                self.delivered.lock().unwrap().push(batch.len());
                Ok(())
            }
        }
    }

    fn dispatcher_with(
        dir: &tempfile::TempDir,
        durable: Arc<ScriptedSink>,
        best_effort: Vec<Arc<dyn RecordSink>>,
        max_attempts: u32,
    ) -> (PersistenceDispatcher, Arc<BackupQueue>) {
        let backup_path = dir.path().join("unsaved_data.json");
        let backup = Arc::new(BackupQueue::new(&backup_path));
        let dispatcher = PersistenceDispatcher::new(
            &test_config(max_attempts, 1000, &backup_path),
            durable,
            best_effort,
            backup.clone(),
        );
        (dispatcher, backup)
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_succeeds_after_transient_failures() {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(ScriptedSink::new(2));
        let (dispatcher, backup) = dispatcher_with(&dir, durable.clone(), Vec::new(), 3);

        dispatcher.deliver(batch(3)).await;

        assert_eq!(durable.call_count(), 3);
        assert_eq!(*durable.delivered.lock().unwrap(), vec![3]);
        assert_eq!(backup.len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(ScriptedSink::new(2));
        let (dispatcher, _backup) = dispatcher_with(&dir, durable.clone(), Vec::new(), 3);

        let start = Instant::now();
        dispatcher.deliver(batch(1)).await;
        // Two failures: 1s then 2s of backoff under paused time
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_queue_exactly_one_backup_entry() {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(ScriptedSink::new(u32::MAX));
        let (dispatcher, backup) = dispatcher_with(&dir, durable.clone(), Vec::new(), 3);

        dispatcher.deliver(batch(1)).await;

        assert_eq!(durable.call_count(), 3);
        let pending = backup.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 3);
        assert_eq!(pending[0].batch.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_best_effort_failure_does_not_affect_durable_path() {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(ScriptedSink::new(0));
        let broken: Arc<ScriptedSink> = Arc::new(ScriptedSink::new(u32::MAX));
        let (dispatcher, backup) = dispatcher_with(
            &dir,
            durable.clone(),
            vec![broken.clone() as Arc<dyn RecordSink>],
            3,
        );

        dispatcher.deliver(batch(2)).await;

        assert_eq!(broken.call_count(), 1); // best-effort is never retried
        assert_eq!(*durable.delivered.lock().unwrap(), vec![2]);
        assert_eq!(backup.len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_backlog_drains_queue() {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(ScriptedSink::new(3));
        let (dispatcher, backup) = dispatcher_with(&dir, durable.clone(), Vec::new(), 3);

        // Exhausts all three attempts, lands in the backup queue
        dispatcher.deliver(batch(2)).await;
        assert_eq!(backup.len().await.unwrap(), 1);

        // Sink recovered: the replay pass drains the queue
        let outcome = dispatcher.replay_backlog().await.unwrap();
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(backup.len().await.unwrap(), 0);
        assert_eq!(*durable.delivered.lock().unwrap(), vec![2]);
    }
}
