// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sampling scheduler configuration
//!
//! This module defines the structures controlling when sampling passes are
//! triggered: fixed-interval cadence, wall-clock boundary alignment, and the
//! degraded cadence used while the system is under load.

use serde::{Deserialize, Serialize};

/// Trigger policy for sampling passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Trigger every `interval_seconds` from the previous trigger.
    FixedInterval,
    /// Trigger at wall-clock instants whose minute is a multiple of
    /// `boundary_minutes` (:00, :10, :20 for a 10-minute period).
    BoundaryAligned,
}

/// Configuration for the sampling scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Flag to enable or disable data acquisition.
    pub enabled: bool,

    /// Trigger policy.
    pub mode: SamplingMode,

    /// Interval between passes in fixed-interval mode, in seconds.
    pub interval_seconds: u64,

    /// Boundary period in minutes for boundary-aligned mode.
    ///
    /// Must divide 60 so the trigger marks fall on the same minutes every
    /// hour. A process started mid-period waits for the next true boundary
    /// instead of firing immediately.
    pub boundary_minutes: u32,

    /// System load fraction (0..1) above which the degraded interval is used.
    pub degraded_load_threshold: f32,

    /// Interval substituted for `interval_seconds` while the load threshold
    /// is exceeded, in seconds. Reverts once load drops.
    pub degraded_interval_seconds: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SamplingMode::FixedInterval,
            interval_seconds: 10,
            boundary_minutes: 10,
            degraded_load_threshold: 0.85,
            degraded_interval_seconds: 30,
        }
    }
}
