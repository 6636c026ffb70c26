// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! This module provides functionality for running and managing the logger's
//! background tasks. It handles the lifecycle of:
//!
//! - The sampling scheduler driving register acquisition
//! - The periodic backup replay draining deferred batches
//! - System health monitoring (heartbeat)
//!
//! The daemon system allows for graceful startup and shutdown of these
//! services: shutdown stops scheduling new passes, lets the in-flight pass
//! finish, flushes the sample buffer and attempts one final durable
//! delivery bounded by the shutdown timeout.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_powermeter::{config::Config, daemon::launch_daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     // Create and launch daemon with all enabled services
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!
//!     // Wait for all tasks to complete
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::acquisition::{
    get_transport, RegisterSampler, SampleBuffer, SamplingDaemon,
};
use crate::config::Config;
use crate::monitoring::{LoadMonitor, MockLoadMonitor, SysinfoLoadMonitor};
use crate::persistence::{
    BackupQueue, CsvSink, PersistenceDispatcher, RecordSink, SqliteSink,
};

/// Represents a daemon task manager that coordinates the background services
///
/// This structure maintains a collection of asynchronous tasks and provides
/// methods to start, stop, and monitor them.
///
/// # Thread Safety
///
/// The `running` flag is wrapped in an `Arc` so it can be shared between
/// tasks. Each task checks this flag periodically to determine if it should
/// continue running or gracefully terminate.
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    buffer: Option<Arc<SampleBuffer>>,
    dispatcher: Option<Arc<PersistenceDispatcher>>,
    shutdown_timeout: Duration,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            buffer: None,
            dispatcher: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Launch all configured tasks based on configuration
    ///
    /// Builds the transport, sampler, sinks and dispatcher from the
    /// configuration, then starts the sampling scheduler, the periodic
    /// backup replay and the heartbeat task.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        config.validate()?;
        self.shutdown_timeout = Duration::from_secs(config.persistence.shutdown_timeout_seconds);

        // The persistence stack exists only with a durable sink; validation
        // guarantees one whenever sampling is enabled
        if config.persistence.sqlite.enabled {
            let dispatcher = self.build_dispatcher(config)?;
            self.dispatcher = Some(dispatcher.clone());

            // Start sampling if enabled
            if config.sampling.enabled {
                self.start_sampling(config, dispatcher.clone()).await?;
            }

            // Start the periodic backup replay
            self.start_replay(config, dispatcher)?;
        }

        // Start heartbeat task for monitoring
        self.start_heartbeat()?;

        Ok(())
    }

    /// Build the sinks, backup queue and dispatcher from the configuration.
    fn build_dispatcher(&self, config: &Config) -> Result<Arc<PersistenceDispatcher>> {
        let durable: Arc<dyn RecordSink> = Arc::new(SqliteSink::new(
            &config.persistence.sqlite.path,
            &config.persistence.sqlite.table,
            &config.registers,
        )?);

        let mut best_effort: Vec<Arc<dyn RecordSink>> = Vec::new();
        if config.persistence.csv.enabled {
            best_effort.push(Arc::new(CsvSink::new(
                &config.persistence.csv,
                &config.registers,
            )));
        }

        let backup = Arc::new(BackupQueue::new(config.persistence.backup_path.clone()));

        Ok(Arc::new(PersistenceDispatcher::new(
            &config.persistence,
            durable,
            best_effort,
            backup,
        )))
    }

    /// Start the sampling scheduler task
    async fn start_sampling(
        &mut self,
        config: &Config,
        dispatcher: Arc<PersistenceDispatcher>,
    ) -> Result<()> {
        let transport = get_transport(&config.transport).await?;
        let sampler = RegisterSampler::new(transport, config.registers.clone());
        let buffer = Arc::new(SampleBuffer::new(&config.buffer));
        self.buffer = Some(buffer.clone());

        let load_monitor: Box<dyn LoadMonitor> = if config.transport.mock {
            Box::new(MockLoadMonitor::new(0.0))
        } else {
            Box::new(SysinfoLoadMonitor::new())
        };

        let mut daemon = SamplingDaemon::new(
            sampler,
            buffer,
            dispatcher,
            load_monitor,
            config.sampling.clone(),
            self.running.clone(),
        );

        info!("Starting sampling task");
        self.tasks.push(tokio::spawn(async move {
            daemon.start().await
        }));
        Ok(())
    }

    /// Start the periodic backup replay task
    fn start_replay(
        &mut self,
        config: &Config,
        dispatcher: Arc<PersistenceDispatcher>,
    ) -> Result<()> {
        let running = self.running.clone();
        let interval = Duration::from_secs(config.persistence.replay_interval_seconds);

        info!(
            "Starting backup replay task (every {} s)",
            interval.as_secs()
        );
        self.tasks.push(tokio::spawn(async move {
            while running.load(Ordering::Relaxed) {
                // Check the flag every second so shutdown stays responsive
                let mut waited = Duration::ZERO;
                while waited < interval && running.load(Ordering::Relaxed) {
                    let step = (interval - waited).min(Duration::from_secs(1));
                    sleep(step).await;
                    waited += step;
                }
                if !running.load(Ordering::Relaxed) {
                    break;
                }
                match dispatcher.replay_backlog().await {
                    Ok(outcome) if outcome.remaining > 0 => {
                        warn!(
                            "Backup replay: {} entries still pending",
                            outcome.remaining
                        );
                    }
                    Ok(_) => {}
                    Err(err) => error!("Backup replay pass failed: {}", err),
                }
            }
            debug!("Backup replay task stopped");
            Ok(())
        }));
        Ok(())
    }

    /// Start the heartbeat task
    fn start_heartbeat(&mut self) -> Result<()> {
        let running = self.running.clone();
        self.tasks.push(tokio::spawn(async move {
            let mut beats: u64 = 0;
            while running.load(Ordering::Relaxed) {
                sleep(Duration::from_secs(1)).await;
                beats += 1;
                if beats % 60 == 0 {
                    debug!("Heartbeat: {} s uptime", beats);
                }
            }
            Ok(())
        }));
        Ok(())
    }

    /// Trigger a graceful shutdown
    ///
    /// Stops scheduling new sampling passes; an in-flight pass finishes on
    /// its own. Call [`Daemon::join`] to wait for the tasks and the final
    /// flush.
    pub fn shutdown(&self) {
        info!("Shutting down daemon");
        self.running.store(false, Ordering::Relaxed);
    }

    /// Wait for all tasks to finish, then flush the remaining buffer
    ///
    /// Any records still buffered are handed to the dispatcher for one
    /// final delivery, bounded by the configured shutdown timeout.
    pub async fn join(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("Task terminated with error: {}", err),
                Err(err) => error!("Task panicked: {}", err),
            }
        }

        if let (Some(buffer), Some(dispatcher)) = (&self.buffer, &self.dispatcher) {
            if !buffer.is_empty() {
                let batch = buffer.take_batch();
                info!(
                    "Final flush: delivering {} buffered records before exit",
                    batch.len()
                );
                let delivery = dispatcher.deliver(batch);
                if timeout(self.shutdown_timeout, delivery).await.is_err() {
                    warn!(
                        "Final delivery did not complete within {} s",
                        self.shutdown_timeout.as_secs()
                    );
                }
            }
        }

        info!("Daemon stopped");
        Ok(())
    }
}
