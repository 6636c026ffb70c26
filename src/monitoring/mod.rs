// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! System monitoring module
//!
//! This module provides the system-load signal consumed by the adaptive
//! sampling cadence. Only the scheduler reads it, and only to decide
//! between the normal and the degraded interval.

use sysinfo::System;

/// Source of the system-load fraction used by the adaptive cadence.
pub trait LoadMonitor: Send {
    /// Current system load as a fraction in 0..1.
    fn current_load(&mut self) -> f32;
}

/// Load monitor backed by the sysinfo global CPU usage.
pub struct SysinfoLoadMonitor {
    system: System,
}

impl SysinfoLoadMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoLoadMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadMonitor for SysinfoLoadMonitor {
    fn current_load(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        (self.system.global_cpu_usage() / 100.0).clamp(0.0, 1.0)
    }
}

/// Fixed-value monitor for tests and mock runs.
pub struct MockLoadMonitor {
    load: f32,
}

impl MockLoadMonitor {
    pub fn new(load: f32) -> Self {
        Self { load }
    }
}

impl LoadMonitor for MockLoadMonitor {
    fn current_load(&mut self) -> f32 {
        self.load
    }
}
