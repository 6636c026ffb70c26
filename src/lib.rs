// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-powermeter project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Powermeter library
//!
//! This library provides a resilient data logger for Modbus RTU power
//! meters: scheduled register acquisition, buffered batching, and
//! multi-sink persistence with retry, local backup and replay.

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod monitoring;
pub mod persistence;
