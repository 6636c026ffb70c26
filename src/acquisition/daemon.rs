// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sampling daemon module
//!
//! This module provides the scheduler that drives sampling passes: fixed
//! intervals measured from the previous trigger, or wall-clock boundary
//! alignment recomputed from the clock after every pass so drift cannot
//! accumulate. Flushes are checked after each pass and dispatched on their
//! own task so a slow sink never delays the next trigger.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Timelike};
use log::{debug, info, warn};
use tokio::time::{sleep, Instant};

use super::buffer::SampleBuffer;
use super::sampler::RegisterSampler;
use crate::config::{SamplingConfig, SamplingMode};
use crate::monitoring::LoadMonitor;
use crate::persistence::PersistenceDispatcher;

/// Observable scheduler state, single instance for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    AwaitingBoundary,
    Sampling,
    Flushing,
}

/// Wall-clock instant of the next boundary trigger.
///
/// The next instant whose minute is a multiple of `period_minutes`, seconds
/// truncated. A call exactly on a boundary schedules the following one, so
/// a process started mid-period always waits for a true boundary.
pub fn next_boundary(now: DateTime<Local>, period_minutes: u32) -> DateTime<Local> {
    let period = period_minutes.max(1);
    let advance = period - now.minute() % period;
    let truncated = now
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + chrono::Duration::minutes(i64::from(advance))
}

/// Scheduler daemon that owns the sampler and drives the sampling loop.
///
/// At most one pass is in flight at any time: the loop awaits each pass and
/// the sampler owns the non-reentrant transport exclusively.
pub struct SamplingDaemon {
    sampler: RegisterSampler,
    buffer: Arc<SampleBuffer>,
    dispatcher: Arc<PersistenceDispatcher>,
    load_monitor: Box<dyn LoadMonitor>,
    config: SamplingConfig,
    /// Flag to control daemon execution, shared with the launcher
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SchedulerState>>,
    pass_counter: Arc<AtomicU64>,
}

impl SamplingDaemon {
    /// Create a new sampling daemon
    pub fn new(
        sampler: RegisterSampler,
        buffer: Arc<SampleBuffer>,
        dispatcher: Arc<PersistenceDispatcher>,
        load_monitor: Box<dyn LoadMonitor>,
        config: SamplingConfig,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sampler,
            buffer,
            dispatcher,
            load_monitor,
            config,
            running,
            state: Arc::new(Mutex::new(SchedulerState::Idle)),
            pass_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle on the scheduler state, for diagnostics.
    pub fn shared_state(&self) -> Arc<Mutex<SchedulerState>> {
        self.state.clone()
    }

    /// Shared handle on the completed-pass counter.
    pub fn pass_counter(&self) -> Arc<AtomicU64> {
        self.pass_counter.clone()
    }

    /// Stop the daemon loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        info!("Stopping sampling daemon");
    }

    /// Check if the daemon is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run the sampling loop until the running flag is cleared.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "Starting sampling daemon ({:?}, {} registers)",
            self.config.mode,
            self.sampler.specs().len()
        );

        let mut next_fixed = Instant::now();
        while self.running.load(Ordering::Relaxed) {
            self.set_state(SchedulerState::AwaitingBoundary);
            match self.config.mode {
                SamplingMode::BoundaryAligned => {
                    // Recomputed from the wall clock each cycle; never from
                    // "last trigger + interval"
                    let target = next_boundary(Local::now(), self.config.boundary_minutes);
                    debug!("Next sampling pass scheduled at {}", target);
                    self.wait_until_wall_clock(target).await;
                }
                SamplingMode::FixedInterval => {
                    self.wait_until_instant(next_fixed).await;
                    let interval = self.effective_interval();
                    next_fixed += interval;
                    // A pass that overran skips straight to the next trigger
                    let now = Instant::now();
                    if next_fixed < now {
                        next_fixed = now;
                    }
                }
            }
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            self.set_state(SchedulerState::Sampling);
            match self.sampler.sample_pass().await {
                Ok(record) => {
                    self.buffer.push(record);
                    let passes = self.pass_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    if passes % 100 == 0 {
                        let stats = self.sampler.stats();
                        debug!(
                            "Completed {} passes ({} partial, {} discarded)",
                            stats.passes, stats.partial_passes, stats.failed_passes
                        );
                    }
                }
                Err(err) => {
                    warn!("Sampling pass failed: {}", err);
                }
            }

            if self.buffer.should_flush(Local::now()) {
                self.set_state(SchedulerState::Flushing);
                let batch = self.buffer.take_batch();
                if !batch.is_empty() {
                    info!("Flushing {} buffered records", batch.len());
                    // Delivery shares nothing with the transport, so it runs
                    // on its own task and never delays the next trigger
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        dispatcher.deliver(batch).await;
                    });
                }
            }
            self.set_state(SchedulerState::Idle);
        }

        info!("Sampling daemon stopped");
        Ok(())
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Interval for the next fixed-mode trigger, consulting the load signal.
    fn effective_interval(&mut self) -> Duration {
        let load = self.load_monitor.current_load();
        if load > self.config.degraded_load_threshold {
            warn!(
                "System load {:.0}% above threshold, degrading to {} s interval",
                load * 100.0,
                self.config.degraded_interval_seconds
            );
            Duration::from_secs(self.config.degraded_interval_seconds)
        } else {
            Duration::from_secs(self.config.interval_seconds)
        }
    }

    /// Sleep until a wall-clock instant, checking the running flag every
    /// second so shutdown stays responsive during long boundary waits.
    async fn wait_until_wall_clock(&mut self, target: DateTime<Local>) {
        while self.running.load(Ordering::Relaxed) {
            let remaining = target.signed_duration_since(Local::now());
            if remaining <= chrono::Duration::zero() {
                return;
            }
            let step = remaining
                .to_std()
                .unwrap_or(Duration::from_secs(1))
                .min(Duration::from_secs(1));
            sleep(step).await;
        }
    }

    /// Sleep until a monotonic instant with the same running-flag cadence.
    async fn wait_until_instant(&mut self, target: Instant) {
        while self.running.load(Ordering::Relaxed) {
            let now = Instant::now();
            if now >= target {
                return;
            }
            let step = (target - now).min(Duration::from_secs(1));
            sleep(step).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{MockRegisterTransport, RegisterSampler};
    use crate::config::{
        default_registers, BufferConfig, PersistenceConfig, SamplingConfig, SamplingMode,
    };
    use crate::monitoring::MockLoadMonitor;
    use crate::persistence::{BackupQueue, PersistenceDispatcher, RecordSink, SqliteSink};
    use chrono::TimeZone;

    fn local(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
    }

    #[test]
    fn test_boundary_from_mid_period() {
        // Started at :03, a 10-minute period triggers first at :10
        assert_eq!(next_boundary(local(9, 3, 27), 10), local(9, 10, 0));
    }

    #[test]
    fn test_boundary_exactly_on_mark_waits_full_period() {
        assert_eq!(next_boundary(local(9, 10, 0), 10), local(9, 20, 0));
    }

    #[test]
    fn test_boundary_rolls_over_the_hour() {
        assert_eq!(next_boundary(local(9, 57, 59), 10), local(10, 0, 0));
    }

    #[test]
    fn test_boundary_one_minute_period() {
        assert_eq!(next_boundary(local(9, 3, 30), 1), local(9, 4, 0));
    }

    fn test_daemon(
        transport: MockRegisterTransport,
        sampling: SamplingConfig,
        flush_max_records: usize,
        load: f32,
        backup_dir: &tempfile::TempDir,
    ) -> (SamplingDaemon, Arc<SqliteSink>, Arc<AtomicBool>) {
        let specs = default_registers();
        let sampler = RegisterSampler::new(Box::new(transport), specs.clone());
        let buffer = Arc::new(SampleBuffer::new(&BufferConfig {
            flush_max_records,
            flush_max_age_seconds: 3600,
        }));
        let sink = Arc::new(SqliteSink::new_in_memory("readings", &specs).unwrap());
        let backup = Arc::new(BackupQueue::new(backup_dir.path().join("unsaved_data.json")));
        let dispatcher = Arc::new(PersistenceDispatcher::new(
            &PersistenceConfig::default(),
            sink.clone() as Arc<dyn RecordSink>,
            Vec::new(),
            backup,
        ));
        let running = Arc::new(AtomicBool::new(true));
        let daemon = SamplingDaemon::new(
            sampler,
            buffer,
            dispatcher,
            Box::new(MockLoadMonitor::new(load)),
            sampling,
            running.clone(),
        );
        (daemon, sink, running)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_interval_samples_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let sampling = SamplingConfig {
            mode: SamplingMode::FixedInterval,
            interval_seconds: 1,
            ..SamplingConfig::default()
        };
        let (mut daemon, sink, running) = test_daemon(
            MockRegisterTransport::with_default_map(),
            sampling,
            2,
            0.0,
            &dir,
        );
        let passes = daemon.pass_counter();

        tokio::spawn(async move { daemon.start().await.unwrap() });

        // Two passes fill the buffer and trigger a flush
        let mut waited = 0;
        while sink.count().unwrap() < 2 && waited < 100 {
            sleep(Duration::from_millis(100)).await;
            waited += 1;
        }
        running.store(false, Ordering::Relaxed);

        assert!(passes.load(Ordering::Relaxed) >= 2);
        assert_eq!(sink.count().unwrap() % 2, 0);
        assert!(sink.count().unwrap() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_interval_slows_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let sampling = SamplingConfig {
            mode: SamplingMode::FixedInterval,
            interval_seconds: 1,
            degraded_load_threshold: 0.85,
            degraded_interval_seconds: 10,
            ..SamplingConfig::default()
        };
        // Load above threshold: every scheduling decision picks 10 s
        let (mut daemon, _sink, running) = test_daemon(
            MockRegisterTransport::with_default_map(),
            sampling,
            1000,
            0.95,
            &dir,
        );
        let passes = daemon.pass_counter();

        tokio::spawn(async move { daemon.start().await.unwrap() });

        sleep(Duration::from_secs(25)).await;
        running.store(false, Ordering::Relaxed);

        // 25 virtual seconds at a degraded 10 s cadence: passes at roughly
        // t=0, t=10, t=20; far fewer than the 25 the normal cadence allows
        let count = passes.load(Ordering::Relaxed);
        assert!(count >= 2, "expected at least 2 passes, got {}", count);
        assert!(count <= 4, "expected degraded cadence, got {} passes", count);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_passes_are_not_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let sampling = SamplingConfig {
            mode: SamplingMode::FixedInterval,
            interval_seconds: 1,
            ..SamplingConfig::default()
        };
        // Empty register bank: every pass is discarded
        let (mut daemon, sink, running) = test_daemon(
            MockRegisterTransport::new(),
            sampling,
            1,
            0.0,
            &dir,
        );
        let passes = daemon.pass_counter();

        tokio::spawn(async move { daemon.start().await.unwrap() });

        sleep(Duration::from_secs(5)).await;
        running.store(false, Ordering::Relaxed);

        assert_eq!(passes.load(Ordering::Relaxed), 0);
        assert_eq!(sink.count().unwrap(), 0);
    }
}
