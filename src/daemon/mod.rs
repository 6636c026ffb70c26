// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Daemon management module
//!
//! This module handles the lifecycle of the logger's background tasks:
//! the sampling scheduler, the periodic backup replay, and the heartbeat.

pub mod launch_daemon;

pub use launch_daemon::Daemon;
